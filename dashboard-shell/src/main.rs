use std::env;
use std::sync::Arc;

use anyhow::Context;
use common_observability::SessionMetrics;
use common_session::{FilePersistence, NavigationOutcome, SessionRuntime};
use dashboard_shell::{load_route_tree, ShellConfig};
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ShellConfig::from_env()?;
    let route_tree = load_route_tree(config.route_tree_path.as_deref())?;
    let metrics = SessionMetrics::new().context("registering session metrics")?;
    let persistence = Arc::new(FilePersistence::new(&config.snapshot_path));
    let runtime = SessionRuntime::with_metrics(
        config.session.clone(),
        persistence,
        route_tree,
        metrics.clone(),
    )
    .context("building session runtime")?;

    let signed_in = match config.credentials() {
        Some(credentials) => match runtime.login(credentials).await {
            Ok(identity) => {
                info!(user_id = %identity.id, "signed_in");
                true
            }
            Err(err) => {
                warn!(error = %err, redirect = ?err.redirect(&config.session), "sign_in_failed");
                false
            }
        },
        None => runtime.start().await,
    };

    if !signed_in {
        println!(
            "{}",
            json!({ "authenticated": false, "redirect_to": config.session.sign_in_path })
        );
        return Ok(());
    }

    let store = runtime.store();
    let summary = json!({
        "authenticated": store.is_authenticated(),
        "identity": store.identity(),
        "current_role": store.current_role(),
        "available_routes": runtime.routes().paths(),
        "navigation": runtime.routes().tree(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    for target in env::args().skip(1) {
        let mut outcome = runtime.navigate(&target).await;
        if matches!(outcome, NavigationOutcome::Denied { .. }) {
            if let Some(role) = runtime.switch_to_allowed_role(&target).await {
                info!(role = %role, path = %target, "switched_role_for_navigation");
                outcome = runtime.navigate(&target).await;
            }
        }
        println!("{}", navigation_report(&target, &outcome));
    }

    debug!(metrics = %metrics.render().unwrap_or_default(), "session_metrics");
    Ok(())
}

fn navigation_report(target: &str, outcome: &NavigationOutcome) -> serde_json::Value {
    match outcome {
        NavigationOutcome::Authorized { path } => {
            json!({ "target": target, "outcome": "authorized", "path": path })
        }
        NavigationOutcome::Denied {
            attempted,
            redirect_to,
        } => json!({
            "target": target,
            "outcome": "denied",
            "attempted": attempted,
            "redirect_to": redirect_to,
        }),
        NavigationOutcome::SignIn {
            attempted,
            redirect_to,
        } => json!({
            "target": target,
            "outcome": "sign_in",
            "attempted": attempted,
            "redirect_to": redirect_to,
        }),
        NavigationOutcome::Superseded { id } => {
            json!({ "target": target, "outcome": "superseded", "id": id })
        }
    }
}
