//! Volume endpoints.

use crate::backend::{ActionHandle, BackendFuture, CreatedVolume, Volume, VolumeApi, VolumeCreate};

use super::types::{
    ActionEnvelope, AttachBody, CreateVolumeBody, EmptyBody, ProtectionBody, VolumeCreateEnvelope,
    VolumeList,
};
use super::{HetznerBackend, HetznerError, PAGE_SIZE};

impl HetznerBackend {
    async fn volume_action<B: serde::Serialize + Sync>(
        &self,
        volume_id: u64,
        action: &str,
        body: &B,
    ) -> Result<ActionHandle, HetznerError> {
        let envelope: ActionEnvelope = self
            .post(&format!("volumes/{volume_id}/actions/{action}"), body)
            .await?;
        Ok(ActionHandle::from(&envelope.action))
    }
}

impl VolumeApi for HetznerBackend {
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeCreate,
    ) -> BackendFuture<'a, CreatedVolume, Self::Error> {
        Box::pin(async move {
            let body = CreateVolumeBody {
                name: &request.name,
                size: request.size_gb,
                location: &request.location,
                labels: &request.labels,
                format: request.format.map(crate::host::Filesystem::as_str),
                automount: false,
            };
            let envelope: VolumeCreateEnvelope = self.post("volumes", &body).await?;
            let action = ActionHandle::from(&envelope.action);
            Ok(CreatedVolume {
                volume: Volume::from(envelope.volume),
                action,
            })
        })
    }

    fn volume_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> BackendFuture<'a, Option<Volume>, Self::Error> {
        Box::pin(async move {
            let list: VolumeList = self
                .get("volumes", &[("name", name.to_owned())])
                .await?;
            Ok(list
                .volumes
                .into_iter()
                .find(|volume| volume.name == name)
                .map(Volume::from))
        })
    }

    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let mut volumes = Vec::new();
            let mut page = 1_u32;
            loop {
                let list: VolumeList = self
                    .get(
                        "volumes",
                        &[
                            ("page", page.to_string()),
                            ("per_page", PAGE_SIZE.to_string()),
                        ],
                    )
                    .await?;
                volumes.extend(list.volumes.into_iter().map(Volume::from));
                match list.meta.pagination.next_page {
                    Some(next) if next > page => page = next,
                    _ => return Ok(volumes),
                }
            }
        })
    }

    fn attach_volume(
        &self,
        volume_id: u64,
        server_id: u64,
    ) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move {
            let body = AttachBody {
                server: server_id,
                automount: false,
            };
            self.volume_action(volume_id, "attach", &body).await
        })
    }

    fn detach_volume(&self, volume_id: u64) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move { self.volume_action(volume_id, "detach", &EmptyBody {}).await })
    }

    fn change_protection(
        &self,
        volume_id: u64,
        delete: bool,
    ) -> BackendFuture<'_, ActionHandle, Self::Error> {
        Box::pin(async move {
            self.volume_action(volume_id, "change_protection", &ProtectionBody { delete })
                .await
        })
    }

    fn delete_volume(&self, volume_id: u64) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("volumes/{volume_id}")).await })
    }
}
