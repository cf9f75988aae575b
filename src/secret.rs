use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::api::ResourceAccessor;

/// URL path component of the secrets resource.
pub const SECRETS_RESOURCE: &str = "secrets";

/// A secret record with its template-defined fields.
///
/// The wire format uses the key `Items` for what the api otherwise calls
/// fields. Ids are stable; names are not guaranteed unique (see
/// [`secret_name_to_id`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Secret {
    pub name: String,
    #[serde(rename = "FolderID")]
    pub folder_id: i64,
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "SiteID")]
    pub site_id: i64,
    #[serde(rename = "SecretTemplateID")]
    pub secret_template_id: i64,
    #[serde(rename = "SecretPolicyID")]
    pub secret_policy_id: i64,
    pub active: bool,
    pub checked_out: bool,
    pub check_out_enabled: bool,
    #[serde(rename = "Items")]
    pub fields: Vec<SecretField>,
}

/// One item (field) of a secret.
///
/// A `file_attachment_id` of 0 means the field holds its value inline;
/// anything else marks a file attachment whose real content has to be
/// fetched separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SecretField {
    #[serde(rename = "ItemID")]
    pub item_id: i64,
    #[serde(rename = "FieldID")]
    pub field_id: i64,
    #[serde(rename = "FileAttachmentID")]
    pub file_attachment_id: i64,
    pub field_description: String,
    pub field_name: String,
    pub filename: String,
    pub item_value: String,
    pub slug: String,
    pub is_file: bool,
    pub is_notes: bool,
    pub is_password: bool,
}

impl Secret {
    /// Returns the value of the first field matching `field_name` by
    /// field name or slug (exact, case sensitive).
    pub fn field(&self, field_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field_name == field.field_name || field_name == field.slug)
            .map(|field| field.item_value.as_str())
    }
}

/// Multiple exact matches were found for a secret name search.
///
/// Distinguished from the plain "no secrets found" failure so callers can
/// present the candidates or pick their own disambiguation strategy.
#[derive(Debug, Clone, Error)]
#[error("multiple ({}) secrets found with name {}", .ids.len(), .searched_name)]
pub struct MultipleSecretsFoundError {
    /// Secret ids for all matched secrets, in response order.
    pub ids: Vec<i64>,
    searched_name: String,
}

impl MultipleSecretsFoundError {
    /// Name which matched the secrets.
    pub fn searched_name(&self) -> &str {
        &self.searched_name
    }
}

// record shape of the search listing; decoded only long enough to pull
// the ids out
#[allow(dead_code)]
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct SearchRecord {
    #[serde(rename = "ID")]
    id: i64,
    name: String,
    #[serde(rename = "SecretTemplateID")]
    secret_template_id: i64,
    secret_template_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchListing {
    #[serde(rename = "Records")]
    records: Vec<SearchRecord>,
}

/// Resolves the id of the named secret, if only a single exact match is
/// found. No match is a plain error; multiple exact matches return a
/// [`MultipleSecretsFoundError`] carrying the ids of all matched secrets.
pub fn secret_name_to_id(accessor: &dyn ResourceAccessor, name: &str) -> Result<i64> {
    let filter = form_urlencoded::Serializer::new(String::new())
        .append_pair("filter.searchFieldSlug", "name")
        .append_pair("filter.searchText", name)
        .append_pair("filter.doNotCalculateTotal", "true")
        .finish();

    let data = accessor
        .access_resource(Method::GET, SECRETS_RESOURCE, &format!("?{}", filter), None)
        .with_context(|| format!("accessing resource {}", SECRETS_RESOURCE))?;

    let listing: SearchListing =
        serde_json::from_slice(&data).context("unmarshaling search response failed")?;

    match listing.records.as_slice() {
        [] => Err(anyhow!("no secrets found with name '{}'", name)),
        [record] => Ok(record.id),
        records => Err(MultipleSecretsFoundError {
            ids: records.iter().map(|record| record.id).collect(),
            searched_name: name.to_owned(),
        }
        .into()),
    }
}

/// Gets the secret with `id` from the Secret Server.
///
/// File attachment fields arrive from the primary fetch holding a dummy
/// value; their real content is downloaded and substituted before the
/// secret is returned, so callers never observe a placeholder. The first
/// failing fetch aborts the whole call.
pub fn get_secret(accessor: &dyn ResourceAccessor, id: i64) -> Result<Secret> {
    let data = accessor.access_resource(Method::GET, SECRETS_RESOURCE, &id.to_string(), None)?;

    let mut secret: Secret = serde_json::from_slice(&data)
        .with_context(|| format!("parsing response from /{}/{}", SECRETS_RESOURCE, id))?;

    for field in secret.fields.iter_mut() {
        if field.file_attachment_id != 0 {
            let path = format!("{}/fields/{}", id, field.slug);

            let data = accessor.access_resource(Method::GET, SECRETS_RESOURCE, &path, None)?;
            field.item_value = String::from_utf8_lossy(&data).into_owned();
        }
    }

    Ok(secret)
}
