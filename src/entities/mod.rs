pub mod prelude;

pub mod claim_status;
