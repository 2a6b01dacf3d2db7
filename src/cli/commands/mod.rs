mod dsn;
mod password;
mod reconcile;
mod status;

pub use dsn::{DsnArgs, cmd_dsn};
pub use password::cmd_password;
pub use reconcile::cmd_reconcile;
pub use status::cmd_status;
