//! Named parameter generators used to substitute `${name}` tokens in request
//! templates with freshly drawn values on every send.

use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use std::collections::HashMap;

/// A single named parameter declaration, as it appears in the config file
/// under `Params`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamsConf {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub spec: HashMap<String, String>,
}

/// Resolved parameter generator. A closed, tagged set rather than a trait
/// object: the set of kinds is fixed and dispatch is a branch, not a vtable
/// call.
#[derive(Debug, Clone)]
pub enum ParamSource {
    RandomInt { name: String, start: i64, end: i64 },
    RandomStr { name: String, length: usize },
}

impl ParamSource {
    pub fn from_conf(conf: &ParamsConf) -> crate::error::Result<Self> {
        match conf.kind.as_str() {
            "RandomInt" => {
                let start = get_i64(&conf.spec, "start")?;
                let end = get_i64(&conf.spec, "end")?;
                Ok(Self::RandomInt {
                    name: conf.name.clone(),
                    start,
                    end,
                })
            }
            "RandomStr" => {
                let length = get_i64(&conf.spec, "length")? as usize;
                Ok(Self::RandomStr {
                    name: conf.name.clone(),
                    length,
                })
            }
            other => Err(crate::error::Error::Config(format!(
                "unknown param type {other} for param {}",
                conf.name
            ))),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::RandomInt { name, .. } => name,
            Self::RandomStr { name, .. } => name,
        }
    }

    /// token this generator substitutes in a template, e.g. `${id}`.
    pub fn token(&self) -> String {
        format!("${{{}}}", self.name())
    }

    /// draw a fresh value and return every occurrence of this generator's
    /// token in `buf` replaced with it. Non-matching bytes are preserved
    /// unchanged; absence of the token is a no-op.
    pub fn replace(&self, buf: &[u8]) -> Vec<u8> {
        let token = self.token();
        let value = self.draw();
        replace_all(buf, token.as_bytes(), &value)
    }

    fn draw(&self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        match *self {
            Self::RandomInt { start, end, .. } => {
                let n = if end > start { rng.gen_range(start..end) } else { start };
                n.to_string().into_bytes()
            }
            Self::RandomStr { length, .. } => (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(length)
                .collect(),
        }
    }
}

fn get_i64(spec: &HashMap<String, String>, key: &str) -> crate::error::Result<i64> {
    spec.get(key)
        .ok_or_else(|| crate::error::Error::Config(format!("missing param spec field {key}")))?
        .parse()
        .map_err(|_| crate::error::Error::Config(format!("param spec field {key} is not an integer")))
}

fn replace_all(haystack: &[u8], needle: &[u8], value: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(value);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_int_replaces_every_occurrence() {
        let p = ParamSource::RandomInt {
            name: "i".into(),
            start: 1,
            end: 2,
        };
        let out = p.replace(b"id=${i}&x=${i}");
        assert!(!out.windows(5).any(|w| w == b"${i}"));
        assert_eq!(out, b"id=1&x=1");
    }

    #[test]
    fn random_str_draws_requested_length() {
        let p = ParamSource::RandomStr {
            name: "s".into(),
            length: 5,
        };
        let out = p.replace(b"s=${s}");
        assert_eq!(out, format!("s={}", String::from_utf8(out[2..].to_vec()).unwrap()).into_bytes());
        assert_eq!(out.len(), 2 + 5);
    }

    #[test]
    fn missing_token_is_noop() {
        let p = ParamSource::RandomInt {
            name: "z".into(),
            start: 1,
            end: 10,
        };
        let out = p.replace(b"no tokens here");
        assert_eq!(out, b"no tokens here");
    }
}
