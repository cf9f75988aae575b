use anyhow::{anyhow, Context, Result};
use structopt::StructOpt;

mod api;
mod config;
mod opt;
mod secret;

use api::SecretServer;
use config::{Config, ConfigSaveFormat};
use opt::{Command, ConfigCommand, Opt, SecretCommand};
use secret::{MultipleSecretsFoundError, Secret};

fn print_field(secret: &Secret, field_name: &str) -> Result<()> {
    match secret.field(field_name) {
        Some(value) => {
            print!("{}", value);
            Ok(())
        }
        None => Err(anyhow!(
            "no field with name or slug '{}' in secret {}",
            field_name,
            secret.id
        )),
    }
}

fn run_secret_command(config: Config, command: &SecretCommand) -> Result<()> {
    let server = SecretServer::new(config.server_settings, config.http_options);

    match command {
        SecretCommand::Get {
            secret_id,
            field_name,
        } => {
            let secret = server.secret(*secret_id).context("get secret failed")?;
            print_field(&secret, field_name)?;
        }
        SecretCommand::GetByName { name, field_name } => {
            let id = server.secret_name_to_id(name)?;
            let secret = server.secret(id).context("get secret failed")?;
            print_field(&secret, field_name)?;
        }
        SecretCommand::Json { secret_id } => {
            let secret = server.secret(*secret_id).context("get secret failed")?;
            let rendered =
                serde_json::to_string(&secret).context("serializing secret to json failed")?;

            print!("{}", rendered);
        }
        SecretCommand::LookupId { name } => {
            let id = server.secret_name_to_id(name)?;

            print!("{}", id);
        }
    }

    Ok(())
}

fn run_config_command(config: Config, command: &ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Save {
            path,
            format,
            overwrite,
        } => {
            config.save(path, *format, *overwrite)?;
        }
        ConfigCommand::Pack => {
            print!("{}", config.to_string(ConfigSaveFormat::Packed)?);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let config = opt.to_config().context("loading config failed")?;

    let result = match &opt.command {
        Command::Secret(secret_command) => run_secret_command(config, secret_command),
        Command::Config(config_command) => run_config_command(config, config_command),
    };

    if let Err(err) = result {
        // a name matching more than one secret is the one failure the user
        // can act on directly, so list the candidate ids before exiting
        if let Some(found) = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<MultipleSecretsFoundError>())
        {
            eprintln!(
                "tssci: candidate ids for '{}': {:?}",
                found.searched_name(),
                found.ids
            );
        }

        return Err(err);
    }

    Ok(())
}
