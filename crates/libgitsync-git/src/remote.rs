//! Remote plumbing: refspecs and authenticated fetch options

use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks};
use libgitsync_core::Credentials;
use tracing::debug;

/// Username sent with a token when none is configured
const TOKEN_USERNAME: &str = "git";

/// Local branch reference, e.g. `refs/heads/master`
pub fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// Forced refspec fetching only `branch` into its remote-tracking ref
pub fn fetch_refspec(remote_name: &str, branch: &str) -> String {
    format!("+refs/heads/{}:refs/remotes/{}/{}", branch, remote_name, branch)
}

/// Fetch options carrying HTTP basic credentials when a token is set.
///
/// The credential callback answers once; libgit2 asks again only after the
/// server rejected the first answer.
pub(crate) fn fetch_options(credentials: &Credentials) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if credentials.is_set() {
        let mut attempted = false;
        callbacks.credentials(move |url, username_from_url, allowed| {
            if attempted {
                return Err(git2::Error::from_str("authentication rejected by remote"));
            }
            attempted = true;
            if !allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Err(git2::Error::from_str(
                    "remote does not accept username/token authentication",
                ));
            }
            let user = if !credentials.user.is_empty() {
                credentials.user.as_str()
            } else {
                username_from_url.unwrap_or(TOKEN_USERNAME)
            };
            debug!(url, user, "sending credentials");
            Cred::userpass_plaintext(user, &credentials.token)
        });
    }

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}
