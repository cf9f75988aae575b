use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::arg_enum;
use const_format::concatcp;
use rmp_serde::Deserializer as MessagePackDeserializer;
use rmp_serde::Serializer as MessagePackSerializer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use url::Url;

use crate::api::parse_url;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "version")]
pub enum ConfigLoader {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

pub fn deserialize_message_pack<O: DeserializeOwned>(raw: &[u8]) -> Result<O> {
    let cursor = Cursor::new(raw);
    let mut d = MessagePackDeserializer::new(cursor);
    Deserialize::deserialize(&mut d).context("deserializing message pack failed")
}

pub fn serialize_message_pack<I: Serialize>(input: I) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut s = MessagePackSerializer::new(&mut buf);
    input
        .serialize(&mut s)
        .context("serializing to messgagepack failed")?;

    Ok(buf)
}

impl ConfigLoader {
    pub fn from_str(s: &str, format: ConfigSaveFormat) -> Result<Config> {
        let cl: ConfigLoader = match format {
            ConfigSaveFormat::Toml => toml::from_str(s)?,
            ConfigSaveFormat::Json => serde_json::from_str(s)?,
            ConfigSaveFormat::Packed => {
                let raw: Vec<u8> = bs58::decode(s)
                    .into_vec()
                    .context("decoding base58 failed")?;
                deserialize_message_pack(&raw)?
            }
        };

        match cl {
            ConfigLoader::V1(config_v1) => Ok(config_v1),
        }
    }

    pub fn load(path: &PathBuf, format: ConfigSaveFormat) -> Result<Config> {
        let raw = fs::read_to_string(path)?;

        ConfigLoader::from_str(&raw, format)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigV1 {
    pub server_settings: ServerSettings,
    #[serde(default)]
    pub http_options: HttpOptions,
}

pub type Config = ConfigV1;

arg_enum! {
    #[derive(Debug, Clone, Copy)]
    pub enum ConfigSaveFormat {
        Toml,
        Json,
        Packed,
    }
}

impl ConfigV1 {
    pub fn to_string(&self, format: ConfigSaveFormat) -> Result<String> {
        let config_loader = ConfigLoader::V1(self.clone());

        let serialized = match format {
            ConfigSaveFormat::Toml => {
                toml::to_string(&config_loader).context("serializing to toml failed")?
            }
            ConfigSaveFormat::Json => {
                serde_json::to_string(&config_loader).context("serializing to json failed")?
            }
            ConfigSaveFormat::Packed => {
                let buf = serialize_message_pack(config_loader)
                    .context("serializing to messagepack failed")?;
                bs58::encode(&buf).into_string()
            }
        };

        Ok(serialized)
    }

    pub fn save(&self, path: &PathBuf, format: ConfigSaveFormat, overwrite: bool) -> Result<()> {
        if path.is_dir() {
            return Err(anyhow!("config output path is a directory"));
        }

        if path.exists() && !overwrite {
            return Err(anyhow!(
                "config output path already exists and overwrite is not set"
            ));
        }

        let serialized = self.to_string(format)?;

        fs::write(path, serialized).context("writing serialized config to file failed")?;

        Ok(())
    }
}

pub const DEFAULT_TIMEOUT: usize = 60;
pub const DEFAULT_MAX_REDIRECTS: usize = 0;
pub const DEFAULT_TLD: &str = "com";

fn default_timeout() -> usize {
    DEFAULT_TIMEOUT
}

fn default_tld() -> String {
    DEFAULT_TLD.to_owned()
}

fn default_as_false() -> bool {
    false
}

#[derive(StructOpt, Debug, Serialize, Deserialize, Clone)]
pub struct HttpOptions {
    #[structopt(
        long,
        env = "TSS_CI_TIMEOUT",
        default_value = concatcp!(DEFAULT_TIMEOUT),
        help = "Connection timeout in seconds"
    )]
    #[serde(default = "default_timeout")]
    pub timeout: usize,
    #[structopt(
        long,
        env = "TSS_CI_MAX_REDIRECTS",
        default_value = concatcp!(DEFAULT_MAX_REDIRECTS),
        help = "Maximum numbers of redirects"
    )]
    pub max_redirects: usize,

    // TLS options and flags
    #[structopt(
        long,
        help = "Use native TLS implementation (for linux musl builds a vendored openssl is used)"
    )]
    #[serde(default = "default_as_false")]
    pub use_native_tls: bool,
    #[structopt(
        long,
        help = "DANGER: completely disables all TLS (common name and certificate) verification. You should not use this. A better approach is just using plain http so there's no false sense of security"
    )]
    #[serde(default = "default_as_false")]
    pub danger_disable_tls_verification: bool,
    #[structopt(
        long,
        env = "TSS_CI_ADD_DER_ROOT_CERTIFICATE_PATH",
        parse(from_os_str),
        help = "Path to a DER encoded root certificate which should be added to the trust store"
    )]
    pub der_root_certificate_path: Option<PathBuf>,
    #[structopt(
        long,
        env = "TSS_CI_ADD_PEM_ROOT_CERTIFICATE_PATH",
        parse(from_os_str),
        help = "Path to a pem encoded root certificate which should be added to the trust store"
    )]
    pub pem_root_certificate_path: Option<PathBuf>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        HttpOptions {
            danger_disable_tls_verification: false,
            der_root_certificate_path: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            pem_root_certificate_path: None,
            timeout: DEFAULT_TIMEOUT,
            use_native_tls: false,
        }
    }
}

/// Connection settings for one Secret Server installation.
///
/// Cloud tenants are addressed as `https://{tenant}.secretservercloud.{tld}`;
/// an explicit `server_url` takes precedence and is the way to reach
/// on-premises installations.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default = "default_tld")]
    pub tld: String,
    #[serde(default)]
    pub server_url: Option<Url>,
}

impl ServerSettings {
    pub fn base_url(&self) -> Result<Url> {
        if let Some(url) = &self.server_url {
            return Ok(url.clone());
        }

        match &self.tenant {
            Some(tenant) => parse_url(&format!(
                "https://{}.secretservercloud.{}",
                tenant, self.tld
            )),
            None => Err(anyhow!("either server_url or tenant must be set")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug_server_settings() -> ServerSettings {
        ServerSettings {
            username: "app-user".to_owned(),
            password: "app-password".to_owned(),
            tenant: Some("acme".to_owned()),
            tld: DEFAULT_TLD.to_owned(),
            server_url: None,
        }
    }

    fn debug_config() -> Config {
        Config {
            server_settings: debug_server_settings(),
            http_options: HttpOptions::default(),
        }
    }

    #[test]
    #[allow(non_snake_case)]
    fn base_url__tenant() {
        let settings = debug_server_settings();

        let url = settings.base_url().unwrap();

        assert_eq!(url.as_str(), "https://acme.secretservercloud.com/");
    }

    #[test]
    #[allow(non_snake_case)]
    fn base_url__tenant_with_tld() {
        let mut settings = debug_server_settings();
        settings.tld = "eu".to_owned();

        let url = settings.base_url().unwrap();

        assert_eq!(url.host_str(), Some("acme.secretservercloud.eu"));
    }

    #[test]
    #[allow(non_snake_case)]
    fn base_url__server_url_wins_over_tenant() {
        let mut settings = debug_server_settings();
        settings.server_url = Some(Url::parse("https://secrets.example.com/SecretServer").unwrap());

        let url = settings.base_url().unwrap();

        assert_eq!(url.as_str(), "https://secrets.example.com/SecretServer");
    }

    #[test]
    #[allow(non_snake_case)]
    fn base_url__neither_tenant_nor_server_url() {
        let mut settings = debug_server_settings();
        settings.tenant = None;

        let result = settings.base_url();

        assert!(result.is_err());
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__toml_round_trip() {
        let config = debug_config();

        let serialized = config.to_string(ConfigSaveFormat::Toml).unwrap();
        let loaded = ConfigLoader::from_str(&serialized, ConfigSaveFormat::Toml).unwrap();

        assert_eq!(loaded.server_settings.username, "app-user");
        assert_eq!(loaded.server_settings.tenant, Some("acme".to_owned()));
        assert_eq!(loaded.http_options.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__json_round_trip() {
        let config = debug_config();

        let serialized = config.to_string(ConfigSaveFormat::Json).unwrap();
        let loaded = ConfigLoader::from_str(&serialized, ConfigSaveFormat::Json).unwrap();

        assert_eq!(loaded.server_settings.password, "app-password");
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__packed_round_trip() {
        let mut config = debug_config();
        config.server_settings.server_url =
            Some(Url::parse("https://secrets.example.com").unwrap());

        let packed = config.to_string(ConfigSaveFormat::Packed).unwrap();
        let loaded = ConfigLoader::from_str(&packed, ConfigSaveFormat::Packed).unwrap();

        assert_eq!(
            loaded.server_settings.server_url,
            config.server_settings.server_url
        );
        assert_eq!(loaded.server_settings.username, "app-user");
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__toml_missing_http_options_defaults() {
        let raw = r#"
version = "1"

[server_settings]
username = "app-user"
password = "app-password"
tenant = "acme"
"#;

        let loaded = ConfigLoader::from_str(raw, ConfigSaveFormat::Toml).unwrap();

        assert_eq!(loaded.server_settings.tld, DEFAULT_TLD);
        assert_eq!(loaded.http_options.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tssci.toml");

        let config = debug_config();
        config.save(&path, ConfigSaveFormat::Toml, false).unwrap();

        let loaded = ConfigLoader::load(&path, ConfigSaveFormat::Toml).unwrap();

        assert_eq!(loaded.server_settings.username, "app-user");
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__save_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tssci.toml");

        let config = debug_config();
        config.save(&path, ConfigSaveFormat::Toml, false).unwrap();

        let result = config.save(&path, ConfigSaveFormat::Toml, false);
        assert!(result.is_err());

        config.save(&path, ConfigSaveFormat::Toml, true).unwrap();
    }

    #[test]
    #[allow(non_snake_case)]
    fn config__save_refuses_directory() {
        let dir = tempfile::tempdir().unwrap();

        let config = debug_config();
        let result = config.save(&dir.path().to_path_buf(), ConfigSaveFormat::Toml, false);

        assert!(result.is_err());
    }
}
