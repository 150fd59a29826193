use anyhow::{Context, Result};
use mailsight_auth_bridge::{
    AuthError, AuthEvent, AuthState, CallbackParams, FlowOutcome, ResumeOutcome,
};
use mailsight_core::emit_result;

use super::{auth_error_data, end_session, start_mailbox_ingestion, watch, CliContext, Flow};
use crate::navigator::TerminalNavigator;
use crate::ui;

pub async fn run(url: Option<String>, follow: bool, json: bool) -> Result<()> {
    let ctx = CliContext::load()?;

    let redirect = match url {
        Some(url) => url,
        None => ui::prompt_input("Paste the URL your browser was sent to")?,
    };
    let params = CallbackParams::parse(redirect.trim())
        .with_context(|| format!("Not a redirect URL: {}", redirect.trim()))?;

    let flow = ctx.auth_flow(TerminalNavigator::new(false, json))?;
    let outcome = resume(&flow, params).await;
    end_session(&flow);
    after_login(&ctx, &flow, outcome, follow, json).await
}

/// Feed a redirect into the flow.
pub async fn resume(flow: &Flow, params: CallbackParams) -> Result<ResumeOutcome, AuthError> {
    match flow.dispatch(AuthEvent::Callback(params)).await? {
        FlowOutcome::Resumed(outcome) => Ok(outcome),
        FlowOutcome::Redirected(url) => Err(AuthError::AuthInitiation(format!(
            "unexpected redirect to {url}"
        ))),
    }
}

/// Report the login result, then start ingestion for the connected mailbox.
pub async fn after_login(
    ctx: &CliContext,
    flow: &Flow,
    outcome: Result<ResumeOutcome, AuthError>,
    follow: bool,
    json: bool,
) -> Result<()> {
    match outcome {
        Ok(ResumeOutcome::Authenticated(session)) => {
            let account = session.user.as_ref().map(|u| u.label());
            if json {
                emit_result(
                    "auth",
                    "authenticated",
                    serde_json::json!({ "account": account, "message": session.message }),
                );
            } else if let Some(account) = &account {
                ui::info(&format!("Signed in as {account}"));
            }
        }
        Ok(ResumeOutcome::AlreadyHandled { state }) => {
            if json {
                emit_result("auth", "already_handled", serde_json::json!({ "state": state }));
            } else {
                ui::info(&format!("This sign-in was already handled ({state})."));
            }
            if state != AuthState::Authenticated {
                return Ok(());
            }
        }
        Err(e) => {
            if json {
                emit_result("auth", "error", auth_error_data(&e));
            }
            return Err(e).context("Sign-in failed");
        }
    }

    let Some(job) = start_mailbox_ingestion(ctx, flow.state(), json).await? else {
        return Ok(());
    };

    if follow {
        watch::follow(ctx, job, json).await
    } else {
        if !json {
            ui::info("Follow progress with: mailsight watch");
        }
        Ok(())
    }
}
