//! Weaviate over its REST API.

use super::{Property, StoreObject, VectorStore};
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use reqwest::{
    Method, StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct WeaviateStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl WeaviateStore {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("docling-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.store.timeout_seconds))
            .build()
            .with_context(|| "building weaviate http client")?;
        let api_key = std::env::var(&cfg.store.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        let base_url = cfg.store.url.trim_end_matches('/').to_string();
        debug!(url = %base_url, has_api_key = api_key.is_some(), "weaviate client");
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/v1/{path}", self.base_url));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn class_schema(&self, class: &str) -> Result<Option<Value>> {
        let resp = self
            .request(Method::GET, &format!("schema/{class}"))
            .send()
            .with_context(|| format!("fetching schema for {class}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp, "schema lookup")?;
        Ok(Some(resp.json().with_context(|| "decoding schema")?))
    }
}

fn check(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(anyhow!("weaviate {what} failed: HTTP {status}: {body}"))
}

fn batch_errors(result: &Value) -> Vec<String> {
    result
        .pointer("/result/errors/error")
        .and_then(Value::as_array)
        .map(|errs| {
            errs.iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn object_id(result: &Value) -> &str {
    result.get("id").and_then(Value::as_str).unwrap_or("?")
}

impl VectorStore for WeaviateStore {
    fn ensure_collection(&self, name: &str, properties: &[Property]) -> Result<bool> {
        if self.class_schema(name)?.is_some() {
            return Ok(false);
        }
        let props: Vec<Value> = properties
            .iter()
            .map(|p| json!({ "name": p.name, "dataType": [p.data_type.as_str()] }))
            .collect();
        let body = json!({
            "class": name,
            "vectorizer": "none",
            "multiTenancyConfig": { "enabled": true },
            "properties": props,
        });
        let resp = self
            .request(Method::POST, "schema")
            .json(&body)
            .send()
            .with_context(|| format!("creating collection {name}"))?;
        check(resp, "collection create")?;
        info!("created collection {name}");
        Ok(true)
    }

    fn ensure_reference_property(&self, from: &str, property: &str, to: &str) -> Result<()> {
        let schema = self
            .class_schema(from)?
            .ok_or_else(|| anyhow!("collection {from} does not exist"))?;
        let exists = schema
            .get("properties")
            .and_then(Value::as_array)
            .is_some_and(|props| {
                props
                    .iter()
                    .any(|p| p.get("name").and_then(Value::as_str) == Some(property))
            });
        if exists {
            return Ok(());
        }
        let resp = self
            .request(Method::POST, &format!("schema/{from}/properties"))
            .json(&json!({ "name": property, "dataType": [to] }))
            .send()
            .with_context(|| format!("adding reference {from}.{property}"))?;
        check(resp, "reference property create")?;
        info!("added reference {from}.{property} -> {to}");
        Ok(())
    }

    fn ensure_tenant(&self, collection: &str, tenant: &str) -> Result<()> {
        let path = format!("schema/{collection}/tenants");
        let resp = self
            .request(Method::GET, &path)
            .send()
            .with_context(|| format!("listing tenants of {collection}"))?;
        let tenants: Value = check(resp, "tenant list")?
            .json()
            .with_context(|| "decoding tenants")?;
        let exists = tenants.as_array().is_some_and(|list| {
            list.iter()
                .any(|t| t.get("name").and_then(Value::as_str) == Some(tenant))
        });
        if exists {
            return Ok(());
        }
        let resp = self
            .request(Method::POST, &path)
            .json(&json!([{ "name": tenant }]))
            .send()
            .with_context(|| format!("creating tenant {tenant} in {collection}"))?;
        check(resp, "tenant create")?;
        info!("created tenant {tenant} in {collection}");
        Ok(())
    }

    fn upsert_objects(
        &self,
        collection: &str,
        tenant: &str,
        objects: &[StoreObject],
    ) -> Result<usize> {
        if objects.is_empty() {
            return Ok(0);
        }
        let payload: Vec<Value> = objects
            .iter()
            .map(|o| {
                let mut obj = json!({
                    "class": collection,
                    "id": o.uuid.to_string(),
                    "tenant": tenant,
                    "properties": Value::Object(o.properties.clone()),
                });
                if let Some(v) = &o.vector {
                    obj["vector"] = json!(v);
                }
                obj
            })
            .collect();
        let resp = self
            .request(Method::POST, "batch/objects")
            .json(&json!({ "objects": payload }))
            .send()
            .with_context(|| format!("batch upload to {collection}"))?;
        let results: Value = check(resp, "batch upload")?
            .json()
            .with_context(|| "decoding batch response")?;

        let mut failed = 0;
        for result in results.as_array().into_iter().flatten() {
            let errors = batch_errors(result);
            if !errors.is_empty() {
                failed += 1;
                let id = object_id(result);
                warn!(id, "object rejected: {}", errors.join("; "));
            }
        }
        Ok(failed)
    }

    fn add_reference(
        &self,
        collection: &str,
        tenant: &str,
        from: Uuid,
        property: &str,
        to_collection: &str,
        to: Uuid,
    ) -> Result<()> {
        let resp = self
            .request(
                Method::POST,
                &format!("objects/{collection}/{from}/references/{property}"),
            )
            .query(&[("tenant", tenant)])
            .json(&json!({ "beacon": format!("weaviate://localhost/{to_collection}/{to}") }))
            .send()
            .with_context(|| format!("adding {property} reference {from} -> {to}"))?;
        check(resp, "reference add")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_errors_collects_messages() {
        let ok = json!({ "id": "a", "result": {} });
        assert!(batch_errors(&ok).is_empty());

        let bad = json!({
            "id": "b",
            "result": { "errors": { "error": [{ "message": "no tenant" }] } }
        });
        assert_eq!(batch_errors(&bad), vec!["no tenant".to_string()]);
    }

    #[test]
    fn rejected_object_id_falls_back() {
        assert_eq!(object_id(&json!({ "id": "abc" })), "abc");
        assert_eq!(object_id(&json!({ "result": {} })), "?");
    }
}
