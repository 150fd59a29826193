use anyhow::{bail, Result};
use mailsight_auth_bridge::{AuthEvent, FlowOutcome, ResumeOutcome};
use mailsight_core::emit_result;

use super::callback::{after_login, resume};
use super::{auth_error_data, end_session, CliContext};
use crate::loopback::CallbackListener;
use crate::navigator::TerminalNavigator;
use crate::ui;

pub async fn run(no_browser: bool, manual: bool, follow: bool, json: bool) -> Result<()> {
    let ctx = CliContext::load()?;

    // Listen before the browser is sent anywhere so the redirect can't be missed.
    let listener = if manual {
        None
    } else {
        Some(CallbackListener::bind(
            &ctx.config.auth.callback_addr,
            &ctx.config.auth.callback_path,
        )?)
    };

    let flow = ctx.auth_flow(TerminalNavigator::new(!no_browser, json))?;

    if !json {
        ui::header("Connect a mailbox");
    }
    let auth_url = match flow.dispatch(AuthEvent::Connect).await {
        Ok(FlowOutcome::Redirected(url)) => url,
        Ok(FlowOutcome::Resumed(_)) => bail!("Sign-in did not start"),
        Err(e) => {
            if json {
                emit_result("auth", "error", auth_error_data(&e));
            } else {
                ui::error(&format!("Could not start sign-in: {e}"));
            }
            return Err(e.into());
        }
    };
    if json {
        emit_result(
            "auth",
            "awaiting_code",
            serde_json::json!({ "auth_url": auth_url.as_str() }),
        );
    }

    let Some(listener) = listener else {
        if !json {
            ui::info("After signing in, copy the address your browser lands on and run:");
            println!("    mailsight callback '<redirect url>'");
        }
        return Ok(());
    };

    let spinner = (!json).then(|| ui::spinner("Waiting for sign-in..."));
    let pending = listener.wait(ctx.config.verifier_max_age()).await;
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    let pending = match pending {
        Ok(pending) => pending,
        Err(e) => {
            // Nobody came back in time; the verifier is useless now.
            end_session(&flow);
            return Err(e);
        }
    };

    let params = pending.params.clone();
    let outcome = resume(&flow, params).await;
    end_session(&flow);
    match &outcome {
        Ok(ResumeOutcome::Authenticated(_)) => pending.respond(Ok("Your mailbox is connected.")),
        Ok(ResumeOutcome::AlreadyHandled { .. }) => {
            pending.respond(Ok("This sign-in was already handled."))
        }
        Err(e) => pending.respond(Err(&e.to_string())),
    }

    after_login(&ctx, &flow, outcome, follow, json).await
}
