// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Subcommand bodies. Output goes to the given writer, logs go to stderr.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use idaas_signer::{ExSignerConfig, build_ex_signer};

use crate::application::Application;
use crate::configuration::{Command, ExecuteArgs, FetchTokenArgs, ProfileArgs, ShowCacheArgs};
use crate::constants::CACHE_CATEGORIES;
use crate::dispatch::{CloudTarget, FetchCredentialOptions, fetch_credential_for_profile};
use crate::errors::{BrokerError, Result};
use crate::http::unsafe_debug_enabled;
use crate::models::parse_environments;
use crate::profile::find_profile;

/// Runs one subcommand and returns the process exit code.
pub async fn run(
    app: &Application,
    config_file: &Path,
    command: &Command,
    out: &mut impl Write,
) -> Result<i32> {
    match command {
        Command::FetchToken(args) => fetch_token(app, config_file, args, out).await.map(|_| 0),
        Command::Execute(args) => execute(app, config_file, args).await,
        Command::ShowSignerPublicKey(args) => {
            show_signer_public_key(config_file, args, out).map(|_| 0)
        }
        Command::ShowCache(args) => show_cache(app, args, out).map(|_| 0),
        Command::CleanCache => clean_cache(app, out).map(|_| 0),
    }
}

pub async fn fetch_token(
    app: &Application,
    config_file: &Path,
    args: &FetchTokenArgs,
    out: &mut impl Write,
) -> Result<()> {
    let options = FetchCredentialOptions {
        force_new: args.force_new,
        oidc_field: args.oidc_field.parse()?,
    };
    let (_, _, credential) =
        fetch_credential_for_profile(app, &args.profile.profile, config_file, options).await?;
    writeln!(out, "{}", credential.to_json(&args.format, options.oidc_field)?)?;
    Ok(())
}

#[tracing::instrument(skip(app, args), fields(profile = %args.profile.profile))]
pub async fn execute(app: &Application, config_file: &Path, args: &ExecuteArgs) -> Result<i32> {
    let Some((program, program_args)) = args.command.split_first() else {
        return Err(BrokerError::config("no command specified"));
    };
    let options = FetchCredentialOptions {
        force_new: args.force_new,
        ..Default::default()
    };
    let (_, config, credential) =
        fetch_credential_for_profile(app, &args.profile.profile, config_file, options).await?;

    let mut command = tokio::process::Command::new(program);
    command
        .args(program_args)
        .envs(parse_environments(&config.environments))
        .envs(credential.environment(&args.env_region));
    tracing::debug!("[execute] exec args: {:?}", args.command);

    let status = command.status().await.map_err(|e| {
        BrokerError::config(format!("failed to run command {program}: {e}"))
    })?;
    tracing::debug!("[execute] exit status: {}", status);
    Ok(status.code().unwrap_or(1))
}

/// Prints the public key of the signer behind a profile's client assertion.
pub fn show_signer_public_key(
    config_file: &Path,
    args: &ProfileArgs,
    out: &mut impl Write,
) -> Result<()> {
    let (name, config) = find_profile(&args.profile, config_file)?;
    let signer_config = client_assertion_signer(&CloudTarget::select(&name, &config)?)
        .ok_or_else(|| BrokerError::config("ext signer not found"))?;
    let public_key = build_ex_signer(signer_config)?.public_key()?;
    write!(out, "{}", public_key.to_pem()?)?;
    Ok(())
}

fn client_assertion_signer<'a>(target: &CloudTarget<'a>) -> Option<&'a ExSignerConfig> {
    let client_credentials = target.oidc_token_provider()?.client_credentials.as_ref()?;
    client_credentials.client_assertion_signer.as_ref().or_else(|| {
        client_credentials
            .client_assertion_private_ca
            .as_ref()?
            .certificate_key_signer
            .as_ref()
    })
}

pub fn show_cache(app: &Application, args: &ShowCacheArgs, out: &mut impl Write) -> Result<()> {
    let categories: Vec<&str> = match &args.category {
        Some(category) => vec![category.as_str()],
        None => CACHE_CATEGORIES.to_vec(),
    };
    let show_content = unsafe_debug_enabled();
    for category in categories {
        for entry in app.cache.list(category)? {
            match entry.envelope {
                Ok(envelope) => {
                    let cached_at = DateTime::<Utc>::from_timestamp_millis(envelope.cache_time)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default();
                    writeln!(
                        out,
                        "{}/{}\tcached at: {}\tage: {}s\tcontent length: {}",
                        entry.category,
                        entry.key,
                        cached_at,
                        envelope.age().as_secs(),
                        envelope.content.len()
                    )?;
                    writeln!(out, "\tcontext: {}", envelope.context)?;
                    if show_content {
                        writeln!(out, "\tcontent: {}", envelope.content)?;
                    }
                }
                Err(e) => writeln!(out, "{}/{}\tunreadable: {}", entry.category, entry.key, e)?,
            }
        }
    }
    Ok(())
}

pub fn clean_cache(app: &Application, out: &mut impl Write) -> Result<()> {
    let removed = app.cache.clear(&CACHE_CATEGORIES)?;
    writeln!(out, "Removed {removed} cache file(s)")?;
    Ok(())
}
