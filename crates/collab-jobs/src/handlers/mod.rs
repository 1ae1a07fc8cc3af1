//! One handler per job payload variant.

pub mod email;
pub mod matching;
pub mod pool;
pub mod profile;

pub use email::SendEmailHandler;
pub use matching::RunMatchingHandler;
pub use pool::ExpandMatchPoolHandler;
pub use profile::{GenerateProfileHandler, MonthlyRefreshHandler};
