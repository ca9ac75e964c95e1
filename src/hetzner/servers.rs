//! Server lookups.

use crate::backend::{BackendFuture, Server, ServerApi};

use super::HetznerBackend;
use super::types::{ServerEnvelope, ServerList};

impl ServerApi for HetznerBackend {
    fn server_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<Server>, Self::Error> {
        Box::pin(async move {
            let list: ServerList = self
                .get("servers", &[("name", name.to_owned())])
                .await?;
            Ok(list
                .servers
                .into_iter()
                .find(|server| server.name == name)
                .map(Server::from))
        })
    }

    fn server_by_id(&self, id: u64) -> BackendFuture<'_, Server, Self::Error> {
        Box::pin(async move {
            let envelope: ServerEnvelope = self.get(&format!("servers/{id}"), &[]).await?;
            Ok(Server::from(envelope.server))
        })
    }
}
