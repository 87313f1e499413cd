pub mod accept;
pub mod credential;
pub mod model;
pub mod transaction;

pub use accept::AcceptUsersAuthenticationManager;
pub use credential::{Credential, CredentialType};
pub use model::{
    Attributes, Authentication, AuthenticationError, AuthenticationManager, Principal,
};
pub use transaction::{AuthenticationTransaction, TransactionError};
