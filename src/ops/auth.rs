//! Translate a credential handle into child-process auth material.
//!
//! Secrets travel to git exclusively through the child environment and
//! an in-process one-shot credential helper; they never appear on the
//! command line, in the repository config, or in any output we log.

use crate::credentials::{Credential, CredentialHandle};

/// Username substituted when authenticating with a bare token.
const TOKEN_USERNAME: &str = "x-access-token";

/// Helper that answers `git credential fill` from our environment.
/// The leading empty helper clears any inherited system helpers.
const ENV_CREDENTIAL_HELPER: &str =
    r#"!f() { echo "username=${GIT_MCP_AUTH_USER}"; echo "password=${GIT_MCP_AUTH_PASS}"; }; f"#;

/// Environment variables and `-c` config for one authenticated call.
#[derive(Default)]
pub struct AuthMaterial {
    pub env: Vec<(String, String)>,
    pub config: Vec<String>,
}

/// Build auth material for the given credential, if any.
pub fn auth_material(handle: Option<&CredentialHandle>) -> AuthMaterial {
    let mut material = AuthMaterial::default();
    let Some(handle) = handle else {
        // Unauthenticated: still refuse to block on an ssh prompt.
        material
            .env
            .push(("GIT_SSH_COMMAND".into(), "ssh -o BatchMode=yes".into()));
        return material;
    };

    match handle.credential() {
        Credential::Token(token) => {
            material.config.push("credential.helper=".into());
            material
                .config
                .push(format!("credential.helper={ENV_CREDENTIAL_HELPER}"));
            material
                .env
                .push(("GIT_MCP_AUTH_USER".into(), TOKEN_USERNAME.into()));
            material.env.push(("GIT_MCP_AUTH_PASS".into(), token.clone()));
        }
        Credential::UsernamePassword { username, password } => {
            material.config.push("credential.helper=".into());
            material
                .config
                .push(format!("credential.helper={ENV_CREDENTIAL_HELPER}"));
            material
                .env
                .push(("GIT_MCP_AUTH_USER".into(), username.clone()));
            material
                .env
                .push(("GIT_MCP_AUTH_PASS".into(), password.clone()));
        }
        Credential::SshKey { key_path, .. } => {
            // BatchMode fails fast when the key needs an interactive
            // passphrase; agent-loaded keys are the supported path there.
            material.env.push((
                "GIT_SSH_COMMAND".into(),
                format!(
                    "ssh -i {key_path} -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking=accept-new"
                ),
            ));
        }
        Credential::SshAgent => {
            material.env.push((
                "GIT_SSH_COMMAND".into(),
                "ssh -o BatchMode=yes -o StrictHostKeyChecking=accept-new".into(),
            ));
        }
    }

    material
}
