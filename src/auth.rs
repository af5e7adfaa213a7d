use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use tracing::debug;

/// Cleartext check against the one `BOOKD_PASSWORD`. Any user name and
/// database name is accepted; reservations carry their owner as data, not as
/// a login.
#[derive(Debug)]
pub struct BookdAuthSource {
    expected: Vec<u8>,
}

impl BookdAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            expected: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for BookdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        debug!(
            "login from {} as {:?} (database {:?})",
            login.host(),
            login.user(),
            login.database()
        );
        Ok(Password::new(None, self.expected.clone()))
    }
}
