// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::errors::Result;
use crate::profile::default_config_file;

#[derive(Debug, Clone, Parser)]
#[command(name = "alibaba-cloud-idaas", author, version, about, long_about = None)]
pub struct BrokerOptions {
    /// Profile file, defaults to ~/.aliyun/alibaba-cloud-idaas.json
    #[arg(long, global = true, env("ALIBABA_CLOUD_IDAAS_CONFIG"))]
    pub config: Option<PathBuf>,
    /// Cache directory, defaults to ~/.aliyun/alibaba-cloud-idaas
    #[arg(long, global = true, env("ALIBABA_CLOUD_IDAAS_CACHE_DIR"))]
    pub cache_dir: Option<PathBuf>,
    #[arg(long, global = true, default_value = "false", env("ALIBABA_CLOUD_IDAAS_JSON_LOGS"), action = ArgAction::SetTrue)]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the credential of a profile as JSON
    FetchToken(FetchTokenArgs),
    /// Run a command with the credential of a profile in its environment
    #[command(visible_aliases = ["exe", "exec"])]
    Execute(ExecuteArgs),
    /// Print the client assertion signer public key of a profile
    ShowSignerPublicKey(ProfileArgs),
    /// List cached artifacts
    ShowCache(ShowCacheArgs),
    /// Delete cached artifacts
    CleanCache,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ProfileArgs {
    /// Profile name, or an inline profile as JSON or base64 JSON
    #[arg(long, short = 'p', default_value = "")]
    pub profile: String,
}

#[derive(Debug, Clone, Default, Args)]
pub struct FetchTokenArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
    /// Alibaba Cloud output format: aliyuncli, ossutilv2 or credentials-uri
    #[arg(long, short = 'f', default_value = "")]
    pub format: String,
    /// Ignore every cached artifact
    #[arg(long, short = 'N', default_value = "false", action = ArgAction::SetTrue)]
    pub force_new: bool,
    /// OIDC token field: id_token or access_token
    #[arg(long, default_value = "")]
    pub oidc_field: String,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
    #[arg(long, short = 'N', default_value = "false", action = ArgAction::SetTrue)]
    pub force_new: bool,
    /// Region exported to the child process
    #[arg(long, short = 'R', default_value = "")]
    pub env_region: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ShowCacheArgs {
    /// Only show one category: oidc, oidc_token or cloud_token
    #[arg(long, short = 'c')]
    pub category: Option<String>,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            config: None,
            cache_dir: None,
            json_logs: false,
            command: Command::ShowCache(ShowCacheArgs::default()),
        }
    }
}

impl BrokerOptions {
    pub fn config_file(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_token() {
        let options = BrokerOptions::try_parse_from([
            "alibaba-cloud-idaas",
            "fetch-token",
            "-p",
            "dev",
            "--format",
            "ossutilv2",
            "--force-new",
            "--config",
            "/tmp/idaas.json",
        ])
        .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("/tmp/idaas.json")));
        let Command::FetchToken(args) = options.command else {
            panic!("expected fetch-token");
        };
        assert_eq!(args.profile.profile, "dev");
        assert_eq!(args.format, "ossutilv2");
        assert!(args.force_new);
        assert!(args.oidc_field.is_empty());
    }

    #[test]
    fn test_parse_execute_trailing_args() {
        let options = BrokerOptions::try_parse_from([
            "alibaba-cloud-idaas",
            "exec",
            "-p",
            "dev",
            "--",
            "aws",
            "s3",
            "ls",
            "--recursive",
        ])
        .unwrap();
        let Command::Execute(args) = options.command else {
            panic!("expected execute");
        };
        assert_eq!(args.command, vec!["aws", "s3", "ls", "--recursive"]);
    }

    #[test]
    fn test_execute_requires_command() {
        assert!(BrokerOptions::try_parse_from(["alibaba-cloud-idaas", "execute"]).is_err());
    }

    #[test]
    fn test_default_options() {
        let options = BrokerOptions::default();
        assert!(options.cache_dir.is_none());
        assert!(!options.json_logs);
    }
}
