//! `bulwark compile`: print the host filter a profile compiles to.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::domain::firewall::{self, IpFamily};
use crate::infra::config::load_profile;

#[derive(Args)]
pub struct CompileArgs {
    /// Security profile (YAML)
    pub profile: PathBuf,

    /// Print the IPv6 rules instead of IPv4
    #[arg(long)]
    pub ipv6: bool,
}

/// Run the compile command. Touches no host.
///
/// # Errors
///
/// Returns an error if the profile cannot be read or fails validation.
pub fn run(app: &AppContext, args: &CompileArgs) -> Result<ExitCode> {
    let profile = load_profile(&args.profile)?.resolve();
    profile.validate()?;
    let rules = firewall::compile(&profile);
    let family = if args.ipv6 { IpFamily::V6 } else { IpFamily::V4 };
    app.renderer().render_rules(&profile.name, &rules, family)?;
    Ok(ExitCode::SUCCESS)
}
