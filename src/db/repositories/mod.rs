pub mod claim_status;
