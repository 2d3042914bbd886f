mod common;

use chrono::Duration;
use common::{setup, setup_virtual, ScriptedGateway};
use gymdesk::{
    domain::{MembershipPurchase, MembershipType, PaymentStatus},
    error::AppError,
    gateway::InvoiceStatus,
    repository::{MembershipRepository, PaymentRepository},
    service::{CallbackOutcome, CreatePaymentRequest},
};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use uuid::Uuid;

fn online(t: &common::TestContext, purchase: Option<MembershipPurchase>) -> CreatePaymentRequest {
    CreatePaymentRequest {
        gym_id: t.gym.id,
        user_id: None,
        amount: 1_500_000,
        is_online: true,
        purchase,
    }
}

fn offline(t: &common::TestContext, purchase: Option<MembershipPurchase>) -> CreatePaymentRequest {
    CreatePaymentRequest {
        gym_id: t.gym.id,
        user_id: Some(t.athlete.id),
        amount: 1_500_000,
        is_online: false,
        purchase,
    }
}

fn callback_fields(tracking_number: Option<i64>) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    if let Some(tn) = tracking_number {
        fields.insert("trackingNumber".to_string(), tn.to_string());
    }
    fields
}

#[tokio::test]
async fn test_online_payment_starts_pending_with_gateway_redirect() -> anyhow::Result<()> {
    let t = setup().await?;
    let athlete = t.athlete_caller();

    let created = t.ctx.payment_service
        .create_payment(&athlete, online(&t, Some(MembershipPurchase::sessions(10))))
        .await?;

    assert_eq!(created.payment.status, PaymentStatus::Pending);
    assert!(!created.payment.is_paid);
    assert_eq!(created.payment.tracking_number, Some(1000));
    assert_eq!(created.payment.gateway_name.as_deref(), Some("Melli"));
    assert_eq!(created.redirect_url, "https://gateway.test/pay/1000");

    // Nothing is granted before the callback.
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_offline_payment_is_completed_and_activates_immediately() -> anyhow::Result<()> {
    let t = setup().await?;

    let created = t.ctx.payment_service
        .create_payment(&t.admin, offline(&t, Some(MembershipPurchase::sessions(12))))
        .await?;

    assert_eq!(created.payment.status, PaymentStatus::Completed);
    assert!(created.payment.is_paid);
    assert!(created.payment.verified_at.is_some());
    assert_eq!(
        created.redirect_url,
        format!("/payments/result?paymentId={}&success=true", created.payment.id)
    );

    let memberships = t.ctx.membership_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].membership_type, MembershipType::SessionBased);
    assert_eq!(memberships[0].remaining_sessions, 12);

    let grant = t.ctx.membership_repo.find_grant(created.payment.id).await?;
    assert_eq!(grant.map(|g| g.membership_id), Some(memberships[0].id));
    Ok(())
}

#[tokio::test]
async fn test_athlete_cannot_record_offline_payment() -> anyhow::Result<()> {
    let t = setup().await?;

    let result = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), offline(&t, None))
        .await;

    assert!(matches!(result, Err(AppError::Forbidden)));
    Ok(())
}

#[tokio::test]
async fn test_non_positive_amount_is_rejected() -> anyhow::Result<()> {
    let t = setup().await?;
    let mut request = online(&t, None);
    request.amount = 0;

    let result = t.ctx.payment_service.create_payment(&t.athlete_caller(), request).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(t.ctx.payment_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rejected_invoice_marks_payment_failed() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set(&t.gateway.reject_invoice, true);

    let result = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, None))
        .await;
    assert!(matches!(result, Err(AppError::External(_))));

    let payments = t.ctx.payment_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_successful_callback_completes_and_replay_is_a_no_op() -> anyhow::Result<()> {
    let t = setup().await?;
    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::sessions(8))))
        .await?;
    let id = created.payment.id.to_string();

    let outcome = t.ctx.payment_service
        .handle_callback(Some(&id), callback_fields(created.payment.tracking_number))
        .await?;

    let payment = match outcome {
        CallbackOutcome::Completed(payment) => payment,
        other => panic!("expected Completed, got {:?}", other),
    };
    assert!(payment.is_paid);
    assert_eq!(payment.transaction_code.as_deref(), Some("TX-1000"));
    assert_eq!(payment.gateway_reference.as_deref(), Some("REF-1000"));

    let before = t.ctx.membership_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(before[0].remaining_sessions, 8);

    let replay = t.ctx.payment_service
        .handle_callback(Some(&id), callback_fields(created.payment.tracking_number))
        .await?;
    assert!(matches!(replay, CallbackOutcome::AlreadyProcessed(_)));
    assert!(replay.succeeded());

    let after = t.ctx.membership_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].remaining_sessions, 8);
    assert_eq!(after[0].expires_at, before[0].expires_at);

    // The replay never reached the gateway.
    assert_eq!(ScriptedGateway::count(&t.gateway.fetch_calls), 1);
    assert_eq!(ScriptedGateway::count(&t.gateway.verify_calls), 1);
    Ok(())
}

#[tokio::test]
async fn test_callback_during_verification_cannot_fail_the_payment() -> anyhow::Result<()> {
    let v = setup_virtual(StdDuration::from_millis(200)).await?;
    let athlete = common::caller(&v.athlete);
    let created = v.ctx.payment_service
        .create_payment(&athlete, CreatePaymentRequest {
            gym_id: v.gym.id,
            user_id: None,
            amount: 1_500_000,
            is_online: true,
            purchase: Some(MembershipPurchase::sessions(5)),
        })
        .await?;
    let tracking_number = created.payment.tracking_number.unwrap();
    v.gateway.inner.pay(tracking_number).await?;

    let id = created.payment.id.to_string();
    let service = v.ctx.payment_service.clone();
    let (first, second) = tokio::join!(
        service.handle_callback(Some(&id), callback_fields(Some(tracking_number))),
        async {
            // Lands while the first callback is waiting on verify.
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            service.handle_callback(Some(&id), callback_fields(Some(tracking_number))).await
        },
    );

    assert!(matches!(first?, CallbackOutcome::Completed(_)));
    let second = second?;
    assert!(matches!(second, CallbackOutcome::AlreadyProcessed(_)));
    assert_eq!(second.payment().status, PaymentStatus::Pending);

    let stored = v.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.is_paid);

    let memberships = v.ctx.membership_repo.find_by_user(v.athlete.id).await?;
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].remaining_sessions, 5);

    // A later replay is answered from the record.
    let replay = service.handle_callback(Some(&id), callback_fields(Some(tracking_number))).await?;
    assert!(matches!(replay, CallbackOutcome::AlreadyProcessed(_)));
    assert!(replay.succeeded());
    Ok(())
}

#[tokio::test]
async fn test_payment_under_verification_is_not_cancelled() -> anyhow::Result<()> {
    let v = setup_virtual(StdDuration::from_millis(200)).await?;
    let athlete = common::caller(&v.athlete);
    let created = v.ctx.payment_service
        .create_payment(&athlete, CreatePaymentRequest {
            gym_id: v.gym.id,
            user_id: None,
            amount: 800_000,
            is_online: true,
            purchase: Some(MembershipPurchase::monthly(1)),
        })
        .await?;
    let tracking_number = created.payment.tracking_number.unwrap();
    v.gateway.inner.pay(tracking_number).await?;

    let id = created.payment.id.to_string();
    let service = v.ctx.payment_service.clone();
    let (callback, (cancel, expired)) = tokio::join!(
        service.handle_callback(Some(&id), HashMap::new()),
        async {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            let cancel = service.cancel_payment(&athlete, created.payment.id, "changed mind").await;
            let expired = service.expire_stale(None, Duration::zero()).await;
            (cancel, expired)
        },
    );

    assert!(matches!(cancel, Err(AppError::Conflict(_))));
    assert_eq!(expired?, 0);
    assert!(matches!(callback?, CallbackOutcome::Completed(_)));

    let stored = v.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(v.ctx.membership_repo.find_grant(created.payment.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_invoice_for_a_different_amount_is_not_verified() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.report_amount(1_000);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::monthly(12))))
        .await?;

    let outcome = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), callback_fields(created.payment.tracking_number))
        .await?;

    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(outcome.payment().amount, 1_500_000);
    assert!(!outcome.payment().is_paid);
    assert_eq!(ScriptedGateway::count(&t.gateway.verify_calls), 0);
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_declined_verification_fails_without_touching_memberships() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set(&t.gateway.verify_succeeds, false);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::monthly(1))))
        .await?;

    let outcome = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await?;

    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(outcome.payment().status, PaymentStatus::Failed);
    assert!(!outcome.payment().is_paid);
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    assert!(t.ctx.membership_repo.find_grant(created.payment.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_verify_error_marks_failed_and_surfaces_gateway_error() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set(&t.gateway.fail_verify, true);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::sessions(3))))
        .await?;

    let result = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await;
    assert!(matches!(result, Err(AppError::External(_))));

    let stored = t.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fetch_error_marks_failed() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set(&t.gateway.fail_fetch, true);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, None))
        .await?;

    let result = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await;
    assert!(matches!(result, Err(AppError::External(_))));

    let stored = t.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(ScriptedGateway::count(&t.gateway.verify_calls), 0);
    Ok(())
}

#[tokio::test]
async fn test_invoice_not_ready_fails_without_verifying() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set_fetch_status(InvoiceStatus::Failed);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::sessions(3))))
        .await?;

    let outcome = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await?;

    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(ScriptedGateway::count(&t.gateway.verify_calls), 0);
    Ok(())
}

#[tokio::test]
async fn test_tracking_number_mismatch_is_not_ready() -> anyhow::Result<()> {
    let t = setup().await?;
    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::sessions(3))))
        .await?;

    let outcome = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), callback_fields(Some(424242)))
        .await?;

    assert!(matches!(outcome, CallbackOutcome::Failed(_)));
    assert_eq!(ScriptedGateway::count(&t.gateway.fetch_calls), 0);
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_callback_requires_known_payment_id() -> anyhow::Result<()> {
    let t = setup().await?;

    let missing = t.ctx.payment_service.handle_callback(None, HashMap::new()).await;
    assert!(matches!(missing, Err(AppError::Validation(_))));

    let garbage = t.ctx.payment_service.handle_callback(Some("not-a-uuid"), HashMap::new()).await;
    assert!(matches!(garbage, Err(AppError::Validation(_))));

    let unknown = Uuid::new_v4().to_string();
    let result = t.ctx.payment_service.handle_callback(Some(&unknown), HashMap::new()).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_refund_requires_completed_payment() -> anyhow::Result<()> {
    let t = setup().await?;
    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, None))
        .await?;
    let tracking_number = created.payment.tracking_number.unwrap();

    let pending = t.ctx.payment_service.refund(&t.admin, tracking_number, "changed mind").await;
    assert!(matches!(pending, Err(AppError::Conflict(_))));
    assert_eq!(ScriptedGateway::count(&t.gateway.refund_calls), 0);

    let unknown = t.ctx.payment_service.refund(&t.admin, 1, "changed mind").await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_refund_of_completed_payment() -> anyhow::Result<()> {
    let t = setup().await?;
    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, Some(MembershipPurchase::monthly(1))))
        .await?;
    t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await?;
    let tracking_number = created.payment.tracking_number.unwrap();

    // Athletes cannot refund.
    let denied = t.ctx.payment_service.refund(&t.athlete_caller(), tracking_number, "x").await;
    assert!(matches!(denied, Err(AppError::Forbidden)));

    assert!(t.ctx.payment_service.refund(&t.admin, tracking_number, "injury").await?);

    let stored = t.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert!(!stored.is_paid);
    assert_eq!(stored.refund_reason.as_deref(), Some("injury"));
    assert!(stored.refunded_at.is_some());

    let again = t.ctx.payment_service.refund(&t.admin, tracking_number, "injury").await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn test_gateway_refusing_refund_leaves_payment_completed() -> anyhow::Result<()> {
    let t = setup().await?;
    t.gateway.set(&t.gateway.refund_succeeds, false);

    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, None))
        .await?;
    t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await?;

    let refunded = t.ctx.payment_service
        .refund(&t.admin, created.payment.tracking_number.unwrap(), "late")
        .await?;
    assert!(!refunded);

    let stored = t.ctx.payment_repo.find_by_id(created.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.is_paid);
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_payment() -> anyhow::Result<()> {
    let t = setup().await?;
    let athlete = t.athlete_caller();
    let created = t.ctx.payment_service
        .create_payment(&athlete, online(&t, Some(MembershipPurchase::sessions(4))))
        .await?;

    let cancelled = t.ctx.payment_service
        .cancel_payment(&athlete, created.payment.id, "wrong plan")
        .await?;
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("wrong plan"));
    assert_eq!(ScriptedGateway::count(&t.gateway.cancel_calls), 1);

    let again = t.ctx.payment_service
        .cancel_payment(&athlete, created.payment.id, "wrong plan")
        .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    // A late callback for a cancelled payment does nothing.
    let late = t.ctx.payment_service
        .handle_callback(Some(&created.payment.id.to_string()), HashMap::new())
        .await?;
    assert!(matches!(late, CallbackOutcome::AlreadyProcessed(_)));
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expire_stale_cancels_abandoned_online_payments() -> anyhow::Result<()> {
    let t = setup().await?;
    let athlete = t.athlete_caller();

    let abandoned = t.ctx.payment_service
        .create_payment(&athlete, online(&t, None))
        .await?;
    let settled = t.ctx.payment_service
        .create_payment(&t.admin, offline(&t, None))
        .await?;

    // Nothing is an hour old yet.
    assert_eq!(t.ctx.payment_service.expire_stale(Some(t.gym.id), Duration::hours(1)).await?, 0);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let expired = t.ctx.payment_service
        .expire_stale(Some(t.gym.id), Duration::zero())
        .await?;
    assert_eq!(expired, 1);

    let stored = t.ctx.payment_repo.find_by_id(abandoned.payment.id).await?.unwrap();
    assert_eq!(stored.status, PaymentStatus::Cancelled);
    assert_eq!(stored.cancellation_reason.as_deref(), Some("abandoned"));

    let untouched = t.ctx.payment_repo.find_by_id(settled.payment.id).await?.unwrap();
    assert_eq!(untouched.status, PaymentStatus::Completed);

    // Other gyms are out of scope.
    assert_eq!(t.ctx.payment_service.expire_stale(Some(Uuid::new_v4()), Duration::zero()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_reconcile_applies_missing_grants_once() -> anyhow::Result<()> {
    let t = setup().await?;

    // A completed payment whose activation never ran.
    let orphan = gymdesk::domain::Payment::new(
        t.gym.id,
        Some(t.athlete.id),
        900_000,
        false,
        Some(MembershipPurchase::sessions(6)),
    );
    let orphan = t.ctx.payment_repo.create(orphan).await?;
    assert!(t.ctx.membership_repo.find_by_user(t.athlete.id).await?.is_empty());

    assert_eq!(t.ctx.payment_service.reconcile_grants(Some(t.gym.id)).await?, 1);
    let memberships = t.ctx.membership_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(memberships[0].remaining_sessions, 6);
    assert!(t.ctx.membership_repo.find_grant(orphan.id).await?.is_some());

    assert_eq!(t.ctx.payment_service.reconcile_grants(None).await?, 0);
    let memberships = t.ctx.membership_repo.find_by_user(t.athlete.id).await?;
    assert_eq!(memberships[0].remaining_sessions, 6);
    Ok(())
}

#[tokio::test]
async fn test_payments_are_private_to_owner_and_gym_admins() -> anyhow::Result<()> {
    let t = setup().await?;
    let created = t.ctx.payment_service
        .create_payment(&t.athlete_caller(), online(&t, None))
        .await?;

    let other = t.ctx.user_repo
        .create(common::user_request(Some(t.gym.id), "3000000003", gymdesk::domain::Role::Athlete))
        .await?;

    assert!(t.ctx.payment_service.get_payment(&t.admin, created.payment.id).await.is_ok());
    assert!(t.ctx.payment_service.get_payment(&t.athlete_caller(), created.payment.id).await.is_ok());
    let hidden = t.ctx.payment_service.get_payment(&common::caller(&other), created.payment.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound(_))));

    let mine = t.ctx.payment_service.list_user_payments(t.athlete.id).await?;
    assert_eq!(mine.len(), 1);
    Ok(())
}
