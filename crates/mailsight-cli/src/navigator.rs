//! Terminal stand-in for the browser the auth flow steers.

use mailsight_auth_bridge::{Destination, Navigator};

use crate::ui;

pub struct TerminalNavigator {
    open_browser: bool,
    quiet: bool,
}

impl TerminalNavigator {
    pub fn new(open_browser: bool, quiet: bool) -> Self {
        Self {
            open_browser,
            quiet,
        }
    }
}

impl Navigator for TerminalNavigator {
    fn navigate(&self, destination: &Destination) -> anyhow::Result<()> {
        match destination {
            Destination::AuthorizationServer(url) => {
                if self.open_browser {
                    open::that(url.as_str())?;
                    if !self.quiet {
                        ui::info("Opened your browser to sign in.");
                        ui::info(&format!("If nothing happened, visit: {url}"));
                    }
                } else if self.quiet {
                    eprintln!("{url}");
                } else {
                    ui::info("Sign in at:");
                    println!("    {url}");
                }
            }
            Destination::Monitoring => {
                if !self.quiet {
                    ui::success("Mailbox connected.");
                }
            }
            Destination::Landing(url) => {
                let reason = url
                    .query_pairs()
                    .find(|(k, _)| k == "error")
                    .map(|(_, v)| v.into_owned());
                if !self.quiet {
                    match reason {
                        Some(reason) => ui::error(&format!("Sign-in failed: {reason}")),
                        None => ui::info(&format!("Back to {url}")),
                    }
                }
            }
        }
        Ok(())
    }
}
