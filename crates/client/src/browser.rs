//! External browser view for the authorization page.
//!
//! The browser only has to show the page. Its own navigation never drives the
//! handshake; completion arrives over the realtime channel.

use std::future::Future;
use std::io;

use tokio::process::Command;
use tracing::info;

pub trait Browser: Send + Sync + 'static {
    fn open(&self, url: &str) -> impl Future<Output = io::Result<()>> + Send;
}

/// Launches the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    async fn open(&self, url: &str) -> io::Result<()> {
        let status = launcher(url).status().await?;
        info!(
            component = "browser",
            event = "browser.opened",
            success = status.success(),
            "Launched system browser"
        );
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("browser launcher exited with {status}")))
        }
    }
}

fn launcher(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]).arg(url);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    }
}

/// Prints the URL for the user to open by hand (headless machines).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintBrowser;

impl Browser for PrintBrowser {
    async fn open(&self, url: &str) -> io::Result<()> {
        println!();
        println!("  Open this URL to sign in:");
        println!("  {url}");
        println!();
        Ok(())
    }
}
