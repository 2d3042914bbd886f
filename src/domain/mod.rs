pub mod attendance;
pub mod gym;
pub mod membership;
pub mod payment;
pub mod user;

pub use attendance::*;
pub use gym::*;
pub use membership::*;
pub use payment::*;
pub use user::*;
