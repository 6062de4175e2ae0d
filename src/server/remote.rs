use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{FetchResult, Server, Snapshot, SubmitResult};
use crate::errors::{Error, Result};
use crate::operation::Operation;

const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SubmitRequest<'a> {
    base_version: u64,
    operations: &'a [Operation],
}

#[derive(Deserialize)]
struct OperationsResponse {
    operations: Vec<Operation>,
    version: u64,
}

#[derive(Deserialize)]
struct GapResponse {
    earliest: u64,
}

#[derive(Deserialize)]
struct AcceptedResponse {
    version: u64,
    #[serde(default)]
    snapshot_urgent: bool,
}

#[derive(Deserialize)]
struct ConflictResponse {
    version: u64,
}

/// Bearer token sent with every request: hex SHA-256 of the shared secret,
/// so the secret itself never crosses the wire.
fn auth_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn decode<T: serde::de::DeserializeOwned>(resp: ureq::Response) -> Result<T> {
    resp.into_json()
        .map_err(|e| Error::Sync(format!("malformed server response: {e}")))
}

/// A sync server reached over HTTP with JSON bodies under `<url>/v1/client/`.
pub struct RemoteServer {
    agent: ureq::Agent,
    base: String,
    client_id: String,
    token: String,
}

impl RemoteServer {
    pub fn new(url: &str, client_id: &str, encryption_secret: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(TIMEOUT).build();
        Self {
            agent,
            base: format!("{}/v1/client", url.trim_end_matches('/')),
            client_id: client_id.to_string(),
            token: auth_token(encryption_secret),
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}/{path}", self.base))
            .set("X-Client-Id", &self.client_id)
            .set("Authorization", &format!("Bearer {}", self.token))
    }
}

impl Server for RemoteServer {
    fn get_operations_since(&mut self, version: u64) -> Result<FetchResult> {
        let result = self
            .request("GET", "operations")
            .query("since", &version.to_string())
            .call();
        match result {
            Ok(resp) => {
                let body: OperationsResponse = decode(resp)?;
                debug!("fetched {} operations", body.operations.len());
                Ok(FetchResult::Operations {
                    operations: body.operations,
                    version: body.version,
                })
            }
            Err(ureq::Error::Status(410, resp)) => {
                let body: GapResponse = decode(resp)?;
                Ok(FetchResult::Gap {
                    earliest: body.earliest,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn submit_operations(&mut self, ops: &[Operation], base_version: u64) -> Result<SubmitResult> {
        let result = self
            .request("POST", "operations")
            .send_json(SubmitRequest {
                base_version,
                operations: ops,
            });
        match result {
            Ok(resp) => {
                let body: AcceptedResponse = decode(resp)?;
                Ok(SubmitResult::Accepted {
                    version: body.version,
                    snapshot_urgent: body.snapshot_urgent,
                })
            }
            Err(ureq::Error::Status(409, resp)) => {
                let body: ConflictResponse = decode(resp)?;
                Ok(SubmitResult::Conflict {
                    version: body.version,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_snapshot(&mut self) -> Result<Option<Snapshot>> {
        match self.request("GET", "snapshot").call() {
            Ok(resp) => Ok(Some(decode(resp)?)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.request("PUT", "snapshot").send_json(snapshot)?;
        Ok(())
    }
}
