//! Authentication and authorization core.
//!
//! - **Passwords**: Argon2id digests, verified off the async runtime
//! - **Tokens**: stateless HS256 JWTs carrying `{sub, id, role, exp}`
//! - **Resolution**: bearer header first, `access_token` cookie second
//!
//! ## Security Model
//!
//! - Login failures never reveal whether the username exists
//! - Expired and forged tokens are indistinguishable to the client
//! - Registration always creates regular users; elevation is a separate
//!   administrative path
//! - Passwords and raw tokens never reach the logs
//!
//! ## Usage
//!
//! ```ignore
//! let codec = Arc::new(TokenCodec::new(settings.secret_key.as_bytes()));
//! let authenticator = Authenticator::new(Arc::new(store), codec.clone(), &settings)?;
//!
//! let token = authenticator.login("alice", "correct").await?;
//! let identity = IdentityResolver::new(codec).resolve(Some(&token.access_token))?;
//! ```

mod authenticator;
mod context;
mod error;
mod extractor;
mod password;
mod resolver;
mod token;
mod user_store;

pub use authenticator::{Authenticator, NewUser, TokenResponse};
pub use context::Identity;
pub use error::{AuthError, CREDENTIALS_NOT_VALIDATED, INCORRECT_LOGIN};
pub use extractor::{
    AdminUser, CurrentUser, EXPIRED_ACCESS_TOKEN_COOKIE, LOGIN_PAGE_PATH, LoginRedirect, PageUser,
};
pub use password::{PasswordError, hash_password, verify_password};
pub use resolver::{ACCESS_TOKEN_COOKIE, IdentityResolver, bearer_token, token_from_headers};
pub use token::{Claims, TOKEN_ALGORITHM, TokenCodec, VerifiedToken, token_fingerprint};
pub use user_store::{CredentialStore, DuplicateUser, StoreFuture, UserStore};
