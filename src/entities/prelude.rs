pub use super::claim_status::Entity as ClaimStatus;
