use shadowdash_core::auth::{AuthGate, AuthSession, FederatedCredential};

use crate::auth::{auth_client_for_profile, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::resolve_profile;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let profile = resolve_profile(global_profile)?;
    let locale = profile.config.locale;

    if matches!(command, AuthCommands::Logout) && profile.config.firebase_credentials().is_none() {
        clear_stored_session(&profile.name).map_err(|error| CliError::Auth(error.to_string()))?;
        println!("Signed out profile '{}'", profile.name);
        return Ok(());
    }

    let gate = AuthGate::new(auth_client_for_profile(&profile.name, &profile.config)?);
    let to_cli = |error: shadowdash_core::auth::AuthError| CliError::Auth(error.user_message(locale));

    match command {
        AuthCommands::Login { email, password } => {
            let session = gate
                .sign_in_with_password(&email, &password)
                .await
                .map_err(to_cli)?;
            println!("Signed in profile '{}' as {}", profile.name, user_label(&session));
        }
        AuthCommands::Signup { email, password } => {
            let session = gate
                .sign_up_with_password(&email, &password)
                .await
                .map_err(to_cli)?;
            println!(
                "Created account and signed in profile '{}' as {}",
                profile.name,
                user_label(&session)
            );
        }
        AuthCommands::Google { id_token } => {
            let credential = FederatedCredential::Google { id_token };
            let session = gate
                .sign_in_with_federated(&credential)
                .await
                .map_err(to_cli)?;
            println!("Signed in profile '{}' as {}", profile.name, user_label(&session));
        }
        AuthCommands::Status => {
            if let Some(session) = gate.restore().await.map_err(to_cli)? {
                println!(
                    "Profile '{}' is signed in as {} (uid={}, expires_at={})",
                    profile.name,
                    user_label(&session),
                    session.user.uid,
                    session.expires_at
                );
            } else {
                println!("Profile '{}' is not signed in.", profile.name);
            }
        }
        AuthCommands::Logout => {
            let stored = load_stored_session(&profile.name).map_err(to_cli)?;
            if stored.is_some() {
                gate.restore().await.map_err(to_cli)?;
                gate.sign_out().await.map_err(to_cli)?;
            }
            clear_stored_session(&profile.name).map_err(to_cli)?;
            println!("Signed out profile '{}'", profile.name);
        }
    }
    Ok(())
}

pub fn user_label(session: &AuthSession) -> &str {
    session
        .user
        .email
        .as_deref()
        .unwrap_or(session.user.uid.as_str())
}
