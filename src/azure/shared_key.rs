//! Data-plane client talking to an account's blob endpoint directly.
//!
//! Requests are authorised with a shared-key signature when the caller
//! supplied an account key, or by appending the caller's SAS token.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

use super::error::{from_storage_response, transport};
use crate::credentials::sign;
use crate::remote::{
    DataPlane, DataPlaneCredentials, DataPlaneSecret, RemoteError, RemoteErrorKind, RemoteFuture,
};

const STORAGE_VERSION: &str = "2021-06-08";
const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// [`DataPlane`] using shared-key or SAS authorisation.
#[derive(Clone, Debug, Default)]
pub struct SharedKeyClient {
    http: Client,
}

impl SharedKeyClient {
    /// Creates a client over `http`.
    #[must_use]
    pub const fn new(http: Client) -> Self {
        Self { http }
    }

    fn request(
        &self,
        method: &Method,
        credentials: &DataPlaneCredentials,
        container: &str,
    ) -> Result<RequestBuilder, RemoteError> {
        let url = format!("{}/{container}?restype=container", credentials.blob_endpoint());
        match &credentials.secret {
            DataPlaneSecret::SasToken(token) => {
                let query = token.trim_start_matches('?');
                Ok(self
                    .http
                    .request(method.clone(), format!("{url}&{query}"))
                    .header("x-ms-version", STORAGE_VERSION))
            }
            DataPlaneSecret::AccountKey(key) => {
                let date = http_date(OffsetDateTime::now_utc())?;
                let payload = string_to_sign(method, &credentials.account, container, &date);
                let signature = sign(&credentials.account, key, &payload).map_err(|err| {
                    RemoteError::new(RemoteErrorKind::Unauthorized, err.to_string())
                })?;
                Ok(self
                    .http
                    .request(method.clone(), url)
                    .header("x-ms-date", date)
                    .header("x-ms-version", STORAGE_VERSION)
                    .header(
                        "Authorization",
                        format!("SharedKey {}:{signature}", credentials.account),
                    ))
            }
        }
    }

    async fn send(
        &self,
        context: &str,
        method: Method,
        credentials: &DataPlaneCredentials,
        container: &str,
    ) -> Result<Response, RemoteError> {
        let request = self.request(&method, credentials, container)?;
        debug!(account = %credentials.account, container, %method, "data-plane container request");
        request
            .send()
            .await
            .map_err(|err| transport(context, &err))
    }
}

/// Canonical string for a body-less container request.
fn string_to_sign(method: &Method, account: &str, container: &str, date: &str) -> String {
    format!(
        "{method}\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:{date}\nx-ms-version:{STORAGE_VERSION}\n/{account}/{container}\nrestype:container"
    )
}

fn http_date(now: OffsetDateTime) -> Result<String, RemoteError> {
    now.format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
    .map_err(|err| RemoteError::new(RemoteErrorKind::Other, format!("format request date: {err}")))
}

impl DataPlane for SharedKeyClient {
    fn create_container_if_missing<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            const CONTEXT: &str = "create container";
            let response = self.send(CONTEXT, Method::PUT, credentials, container).await?;
            if response.status().is_success() {
                return Ok(());
            }
            let err = from_storage_response(CONTEXT, response).await;
            if err.message.contains(CONTAINER_ALREADY_EXISTS) {
                debug!(account = %credentials.account, container, "container already exists");
                return Ok(());
            }
            Err(err)
        })
    }

    fn delete_container_if_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            const CONTEXT: &str = "delete container";
            let response = self
                .send(CONTEXT, Method::DELETE, credentials, container)
                .await?;
            if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Err(from_storage_response(CONTEXT, response).await)
        })
    }

    fn container_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, bool> {
        Box::pin(async move {
            const CONTEXT: &str = "get container properties";
            let response = self.send(CONTEXT, Method::GET, credentials, container).await?;
            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(from_storage_response(CONTEXT, response).await),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn dates_use_rfc1123() {
        let date = http_date(datetime!(2024-03-05 07:08:09 UTC)).expect("format date");
        assert_eq!(date, "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn string_to_sign_has_twelve_standard_lines() {
        let payload = string_to_sign(&Method::PUT, "acct", "c1", "DATE");
        let lines: Vec<&str> = payload.split('\n').collect();
        assert_eq!(lines.first(), Some(&"PUT"));
        assert_eq!(lines.get(12), Some(&"x-ms-date:DATE"));
        assert_eq!(lines.get(13), Some(&"x-ms-version:2021-06-08"));
        assert_eq!(lines.get(14), Some(&"/acct/c1"));
        assert_eq!(lines.get(15), Some(&"restype:container"));
    }

    #[test]
    fn sas_requests_carry_token() {
        let client = SharedKeyClient::default();
        let credentials = DataPlaneCredentials {
            account: String::from("acct"),
            secret: DataPlaneSecret::SasToken(String::from("?sv=1&sig=abc")),
            endpoint_suffix: String::from("core.windows.net"),
        };
        let request = client
            .request(&Method::GET, &credentials, "c1")
            .and_then(|builder| {
                builder
                    .build()
                    .map_err(|err| RemoteError::new(RemoteErrorKind::Other, err.to_string()))
            })
            .expect("request");
        assert_eq!(
            request.url().as_str(),
            "https://acct.blob.core.windows.net/c1?restype=container&sv=1&sig=abc"
        );
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn key_requests_are_signed() {
        let client = SharedKeyClient::default();
        let credentials = DataPlaneCredentials {
            account: String::from("acct"),
            secret: DataPlaneSecret::AccountKey(String::from("a2V5")),
            endpoint_suffix: String::from("core.windows.net"),
        };
        let request = client
            .request(&Method::PUT, &credentials, "c1")
            .expect("builder")
            .build()
            .expect("request");
        let authorization = request
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(authorization.starts_with("SharedKey acct:"));
    }
}
