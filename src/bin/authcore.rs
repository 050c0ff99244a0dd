//! Authorization server core command line tool.
//!
//! Prints the published key set, or runs the full authorization code flow
//! against in-memory collaborators.

use anyhow::{Context, Result, anyhow};
use authcore::{
    clock::{Clock, SystemClock},
    config::Config,
    oauth::{
        AuthorizationRequest, AuthorizationServer, AuthorizeResponse, ClientAuthentication,
        ClientRecord, TokenForm, UserRecord,
    },
    storage::{ClientStore, MemoryAuthorizationCodeCache, MemoryOAuthStorage, UserStore},
};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(
    name = "authcore",
    about = "OAuth 2.0 authorization server core",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the published JSON Web Key Set
    Jwks,
    /// Run authorization, code redemption, refresh and bearer verification
    Demo {
        /// Client identifier to register
        #[arg(long, default_value = "test-client")]
        client_id: String,
        /// Redirect URI to register and request
        #[arg(long, default_value = "https://app/callback")]
        redirect_uri: String,
        /// Scope to request
        #[arg(long, default_value = "read:transactions")]
        scope: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "authcore=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let cli = Cli::parse();
    let config = Config::new()?;
    info!(version = %config.version, issuer = %config.issuer.as_ref(), "starting authcore");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = Arc::new(MemoryOAuthStorage::new());
    let server = AuthorizationServer::new(
        storage.clone(),
        Arc::new(MemoryAuthorizationCodeCache::new(clock.clone())),
        clock,
        config.server_settings(),
    );

    match cli.command {
        Commands::Jwks => {
            let jwks = server.jwks().await?;
            println!("{}", serde_json::to_string_pretty(&jwks)?);
        }
        Commands::Demo {
            client_id,
            redirect_uri,
            scope,
        } => run_demo(&server, &storage, client_id, redirect_uri, scope).await?,
    }

    Ok(())
}

async fn run_demo(
    server: &AuthorizationServer,
    storage: &MemoryOAuthStorage,
    client_id: String,
    redirect_uri: String,
    scope: String,
) -> Result<()> {
    let client_secret = authcore::oauth::types::generate_token();

    storage
        .store_user(&UserRecord {
            id: "1".to_string(),
            email: "user@example.com".to_string(),
            subject: "user@example.com".to_string(),
        })
        .await?;
    storage
        .store_client(&ClientRecord {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            redirect_uri: redirect_uri.clone(),
            authorized_scope: authcore::oauth::parse_scope(&scope).into_iter().collect(),
            authorized_grants: BTreeSet::from(["code".to_string()]),
            refresh_token: None,
            owning_user_id: "1".to_string(),
        })
        .await?;
    info!(%client_id, "registered demo client");

    let mut request = AuthorizationRequest::new(
        "code",
        client_id.clone(),
        redirect_uri.clone(),
        Some(scope.as_str()),
        Some(uuid::Uuid::new_v4().to_string()),
    );
    let client = server
        .authorize(&mut request)
        .await
        .map_err(|response| anyhow!("authorization rejected: {:?}", response))?;
    info!(client_id = %client.client_id, scope = ?request.scope, "authorization request accepted");

    let redirect = match server.approve(&request, "user@example.com").await {
        AuthorizeResponse::Redirect(url) => url,
        response => return Err(anyhow!("approval failed: {:?}", response)),
    };
    let code = url::Url::parse(&redirect)?
        .query_pairs()
        .find(|(name, _)| name == "code")
        .map(|(_, value)| value.into_owned())
        .context("redirect carries no code")?;
    info!("approved, redirecting with authorization code");

    let credentials = ClientAuthentication {
        client_id: client_id.clone(),
        client_secret,
    };
    let tokens = server
        .token(
            TokenForm {
                grant_type: "authorization_code".to_string(),
                code: Some(code),
                redirect_uri: Some(redirect_uri),
                refresh_token: None,
            },
            &credentials,
        )
        .await?;
    info!(expires_in = tokens.expires_in, "redeemed authorization code");

    let refreshed = server
        .token(
            TokenForm {
                grant_type: "refresh_token".to_string(),
                refresh_token: Some(tokens.refresh_token),
                ..Default::default()
            },
            &credentials,
        )
        .await?;
    info!("refreshed tokens");

    let user = server.userinfo(&refreshed.access_token).await?;
    info!(sub = %user.sub, "verified bearer token");

    println!("{}", serde_json::to_string_pretty(&refreshed)?);
    Ok(())
}
