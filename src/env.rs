// Copyright © 2024 Pathway

use std::env;
use std::error;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("couldn't parse the value of {0:?} environment variable as UTF-8 string")]
    NotUtf8(String),

    #[error("couldn't parse the value of {0:?} environment variable: {1}")]
    ParsingFailed(String, #[source] Box<dyn error::Error + Send + Sync>),
}

pub fn parse_env_var<T: FromStr>(name: &str) -> Result<Option<T>, Error>
where
    T::Err: error::Error + Send + Sync + 'static,
{
    let Some(value) = env::var_os(name) else {
        return Ok(None);
    };
    let value = value
        .into_string()
        .map_err(|_| Error::NotUtf8(name.to_string()))?;
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|err| Error::ParsingFailed(name.to_string(), Box::new(err)))
}

/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_env_flag(name: &str) -> Result<Option<bool>, Error> {
    let Some(value) = parse_env_var::<String>(name)? else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::ParsingFailed(
            name.to_string(),
            format!("{value:?} is not a boolean flag").into(),
        )),
    }
}
