use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::cli::ConnectionArgs;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Resolve sign-in credentials from the connection arguments: an explicit
/// username/password pair wins, then the base64-encoded `user|pass` combined
/// login. Interactive prompting is deliberately not supported; the process
/// runs unattended.
pub fn resolve(connection: &ConnectionArgs) -> Result<Credentials> {
    if let (Some(username), Some(password)) = (&connection.username, &connection.password) {
        return Ok(Credentials {
            username: username.clone(),
            password: password.clone(),
        });
    }

    if let Some(login) = &connection.login {
        return decode_combined_login(login);
    }

    bail!(
        "no credentials supplied: pass --username/--password or set REPORTDIFF_LOGIN \
         to base64(\"user|pass\")"
    );
}

fn decode_combined_login(login: &str) -> Result<Credentials> {
    let decoded = STANDARD
        .decode(login.trim())
        .context("combined login is not valid base64")?;
    let decoded = String::from_utf8(decoded).context("combined login is not valid utf-8")?;

    let Some((username, password)) = decoded.split_once('|') else {
        bail!("combined login must decode to \"user|pass\"");
    };
    if username.is_empty() || password.is_empty() {
        bail!("combined login must decode to \"user|pass\"");
    }

    Ok(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ConnectionArgs {
        ConnectionArgs {
            site: "https://ras.example.org".to_string(),
            username: None,
            password: None,
            login: None,
        }
    }

    #[test]
    fn explicit_pair_wins() {
        let mut connection = args();
        connection.username = Some("alex".to_string());
        connection.password = Some("hunter2".to_string());
        connection.login = Some("ignored".to_string());

        let credentials = resolve(&connection).unwrap();
        assert_eq!(credentials.username, "alex");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn combined_login_decodes() {
        let mut connection = args();
        connection.login = Some(STANDARD.encode("alex|hunter2"));

        let credentials = resolve(&connection).unwrap();
        assert_eq!(credentials.username, "alex");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn malformed_combined_login_is_rejected() {
        let mut connection = args();
        connection.login = Some(STANDARD.encode("no-separator"));
        assert!(resolve(&connection).is_err());

        connection.login = Some("!!not-base64!!".to_string());
        assert!(resolve(&connection).is_err());
    }

    #[test]
    fn missing_credentials_is_an_error() {
        assert!(resolve(&args()).is_err());
    }
}
