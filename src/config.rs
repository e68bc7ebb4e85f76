//! Typed, serde backed run configuration: the in-memory shape produced by
//! either the YAML/JSON config file or the single target CLI convenience
//! path, and consumed uniformly by the run controller.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::params::ParamsConf;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConf {
    pub name: String,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
    #[serde(default)]
    pub use_params: Vec<String>,
    /// path to a local file to upload as multipart/form-data, if set.
    #[serde(default)]
    pub upload_file: Option<String>,
}

fn default_proto() -> String {
    "HTTP/1.1".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpGroup {
    pub name: String,
    pub max_tcp_conn_per_ip: usize,
    #[serde(default)]
    pub tcp_conn_thread: usize,
    #[serde(default)]
    pub tcp_creat_thread: usize,
    #[serde(default)]
    pub tcp_creat_rate: u32,
    #[serde(default)]
    pub src_ip: Vec<String>,
    #[serde(default)]
    pub max_qps: u32,
    pub dst: String,
    pub req_thread: usize,
    #[serde(default = "default_max_request")]
    pub max_request: u64,
    #[serde(default)]
    pub is_https: bool,
    pub send_http: Vec<String>,
}

fn default_max_request() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default = "default_run_time")]
    pub run_time: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub remote_server: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub params: Vec<ParamsConf>,
    pub tcp_groups: Vec<TcpGroup>,
    pub http_confs: Vec<HttpConf>,
}

fn default_run_time() -> u64 {
    10
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            name: String::new(),
            proto: default_proto(),
            method: default_method(),
            uri: String::new(),
            body: String::new(),
            header: HashMap::new(),
            use_params: Vec::new(),
            upload_file: None,
        }
    }
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&bytes),
            _ => Self::from_yaml(&bytes),
        }
    }

    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse either encoding by best effort: YAML first (a superset of
    /// JSON's scalar syntax in practice), falling back to JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_yaml(bytes).or_else(|_| Self::from_json(bytes))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Fail fast validation, run before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.tcp_groups.is_empty() {
            return Err(Error::Config("no tcp_groups configured".into()));
        }
        for group in &self.tcp_groups {
            if group.max_tcp_conn_per_ip == 0 || group.req_thread == 0 || group.max_request == 0 {
                return Err(Error::Config(format!(
                    "group {}: max_tcp_conn_per_ip, req_thread and max_request must be positive",
                    group.name
                )));
            }
            for name in &group.send_http {
                if !self.http_confs.iter().any(|h| &h.name == name) {
                    return Err(Error::Config(format!(
                        "group {} references unknown http conf {name}",
                        group.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the sub config sent to a single remote worker: only the named
    /// groups, plus every http conf and param (remotes ignore unreferenced
    /// ones) and the shared run time / debug flag.
    pub fn sub_config_for(&self, groups: &[String]) -> Self {
        let tcp_groups = self
            .tcp_groups
            .iter()
            .filter(|g| groups.contains(&g.name))
            .cloned()
            .collect();
        Self {
            run_time: self.run_time,
            debug: self.debug,
            remote_server: HashMap::new(),
            params: self.params.clone(),
            tcp_groups,
            http_confs: self.http_confs.clone(),
        }
    }
}

impl serde::Serialize for RunConfig {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        RunConfigRepr::from(self).serialize(serializer)
    }
}

// serde(Serialize) is hand written rather than derived on the primary type
// because `RunConfig` intentionally has asymmetric field defaults on
// deserialize (e.g. `proto`) that don't need mirroring on the way out.
#[derive(serde::Serialize)]
struct RunConfigRepr<'a> {
    run_time: u64,
    debug: bool,
    remote_server: &'a HashMap<String, Vec<String>>,
    params: &'a Vec<ParamsConf>,
    tcp_groups: &'a Vec<TcpGroup>,
    http_confs: &'a Vec<HttpConf>,
}

impl<'a> From<&'a RunConfig> for RunConfigRepr<'a> {
    fn from(c: &'a RunConfig) -> Self {
        Self {
            run_time: c.run_time,
            debug: c.debug,
            remote_server: &c.remote_server,
            params: &c.params,
            tcp_groups: &c.tcp_groups,
            http_confs: &c.http_confs,
        }
    }
}

impl serde::Serialize for ParamsConf {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ParamsConf", 3)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("type", &self.kind)?;
        s.serialize_field("spec", &self.spec)?;
        s.end()
    }
}

impl serde::Serialize for TcpGroup {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("TcpGroup", 11)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("max_tcp_conn_per_ip", &self.max_tcp_conn_per_ip)?;
        s.serialize_field("tcp_conn_thread", &self.tcp_conn_thread)?;
        s.serialize_field("tcp_creat_thread", &self.tcp_creat_thread)?;
        s.serialize_field("tcp_creat_rate", &self.tcp_creat_rate)?;
        s.serialize_field("src_ip", &self.src_ip)?;
        s.serialize_field("max_qps", &self.max_qps)?;
        s.serialize_field("dst", &self.dst)?;
        s.serialize_field("req_thread", &self.req_thread)?;
        s.serialize_field("max_request", &self.max_request)?;
        s.serialize_field("is_https", &self.is_https)?;
        s.serialize_field("send_http", &self.send_http)?;
        s.end()
    }
}

impl serde::Serialize for HttpConf {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("HttpConf", 8)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("proto", &self.proto)?;
        s.serialize_field("method", &self.method)?;
        s.serialize_field("uri", &self.uri)?;
        s.serialize_field("body", &self.body)?;
        s.serialize_field("header", &self.header)?;
        s.serialize_field("use_params", &self.use_params)?;
        s.serialize_field("upload_file", &self.upload_file)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_yaml() {
        let conf = RunConfig {
            run_time: 5,
            debug: true,
            remote_server: HashMap::new(),
            params: vec![],
            tcp_groups: vec![TcpGroup {
                name: "g".into(),
                max_tcp_conn_per_ip: 4,
                tcp_conn_thread: 0,
                tcp_creat_thread: 0,
                tcp_creat_rate: 0,
                src_ip: vec![],
                max_qps: 0,
                dst: "127.0.0.1:80".into(),
                req_thread: 4,
                max_request: 10,
                is_https: false,
                send_http: vec!["h".into()],
            }],
            http_confs: vec![HttpConf {
                name: "h".into(),
                ..Default::default()
            }],
        };
        let yaml = conf.to_yaml().unwrap();
        let back = RunConfig::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(back.tcp_groups[0].name, "g");
        back.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unknown_http_conf_reference() {
        let mut conf = RunConfig::default();
        conf.tcp_groups.push(TcpGroup {
            name: "g".into(),
            max_tcp_conn_per_ip: 1,
            tcp_conn_thread: 0,
            tcp_creat_thread: 0,
            tcp_creat_rate: 0,
            src_ip: vec![],
            max_qps: 0,
            dst: "x".into(),
            req_thread: 1,
            max_request: 1,
            is_https: false,
            send_http: vec!["missing".into()],
        });
        assert!(conf.validate().is_err());
    }
}
