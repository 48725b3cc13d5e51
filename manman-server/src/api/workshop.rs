//! The `WorkshopService` gRPC service.

use manman_core::catalog::Page;
use manman_core::model::InstallationStatus;
use manman_proto::v1 as pb;
use manman_proto::v1::workshop_service_server::WorkshopService;
use tonic::{Request, Response, Status};

use super::convert::*;
use super::{to_status, WorkshopApi};
use crate::lifecycle;

type RpcResult<T> = Result<Response<T>, Status>;

fn page(page_size: i32, page_token: &str) -> Result<Page, Status> {
    Page::from_request(page_size, page_token).map_err(to_status)
}

#[tonic::async_trait]
impl WorkshopService for WorkshopApi {
    async fn create_addon(
        &self,
        request: Request<pb::CreateAddonRequest>,
    ) -> RpcResult<pb::WorkshopAddon> {
        let req = request.into_inner();
        let addon = self
            .state
            .catalog
            .create_addon(
                req.game_id,
                req.workshop_id,
                platform_type_from_proto(req.platform_type).map_err(to_status)?,
                &req.name,
                req.is_collection,
                req.preset_id,
                req.installation_path.as_deref(),
            )
            .await
            .map_err(to_status)?;
        Ok(Response::new(addon_to_proto(addon)))
    }

    async fn get_addon(
        &self,
        request: Request<pb::GetAddonRequest>,
    ) -> RpcResult<pb::WorkshopAddon> {
        let addon = self
            .state
            .catalog
            .get_addon(request.into_inner().addon_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(addon_to_proto(addon)))
    }

    async fn list_addons(
        &self,
        request: Request<pb::ListAddonsRequest>,
    ) -> RpcResult<pb::ListAddonsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let addons = self
            .state
            .catalog
            .list_addons(req.game_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(addons.len());
        Ok(Response::new(pb::ListAddonsResponse {
            addons: addons.into_iter().map(addon_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn delete_addon(
        &self,
        request: Request<pb::DeleteAddonRequest>,
    ) -> RpcResult<pb::WorkshopDeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_addon(request.into_inner().addon_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::WorkshopDeleteResponse { deleted }))
    }

    async fn create_path_preset(
        &self,
        request: Request<pb::CreatePathPresetRequest>,
    ) -> RpcResult<pb::PathPreset> {
        let req = request.into_inner();
        let preset = self
            .state
            .catalog
            .create_path_preset(req.game_id, &req.name, &req.path_template)
            .await
            .map_err(to_status)?;
        Ok(Response::new(preset_to_proto(preset)))
    }

    async fn list_path_presets(
        &self,
        request: Request<pb::ListPathPresetsRequest>,
    ) -> RpcResult<pb::ListPathPresetsResponse> {
        let presets = self
            .state
            .catalog
            .list_path_presets(request.into_inner().game_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::ListPathPresetsResponse {
            presets: presets.into_iter().map(preset_to_proto).collect(),
        }))
    }

    async fn delete_path_preset(
        &self,
        request: Request<pb::DeletePathPresetRequest>,
    ) -> RpcResult<pb::WorkshopDeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_path_preset(request.into_inner().preset_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::WorkshopDeleteResponse { deleted }))
    }

    async fn create_library(
        &self,
        request: Request<pb::CreateLibraryRequest>,
    ) -> RpcResult<pb::WorkshopLibrary> {
        let req = request.into_inner();
        let library = self
            .state
            .catalog
            .create_library(req.game_id, &req.name)
            .await
            .map_err(to_status)?;
        Ok(Response::new(library_to_proto(library)))
    }

    async fn list_libraries(
        &self,
        request: Request<pb::ListLibrariesRequest>,
    ) -> RpcResult<pb::ListLibrariesResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let libraries = self
            .state
            .catalog
            .list_libraries(req.game_id, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(libraries.len());
        Ok(Response::new(pb::ListLibrariesResponse {
            libraries: libraries.into_iter().map(library_to_proto).collect(),
            next_page_token,
        }))
    }

    async fn delete_library(
        &self,
        request: Request<pb::DeleteLibraryRequest>,
    ) -> RpcResult<pb::WorkshopDeleteResponse> {
        let deleted = self
            .state
            .catalog
            .delete_library(request.into_inner().library_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::WorkshopDeleteResponse { deleted }))
    }

    async fn add_library_addon(
        &self,
        request: Request<pb::AddLibraryAddonRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .add_library_addon(req.library_id, req.addon_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    async fn remove_library_addon(
        &self,
        request: Request<pb::RemoveLibraryAddonRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .remove_library_addon(req.library_id, req.addon_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    async fn add_library_reference(
        &self,
        request: Request<pb::AddLibraryReferenceRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .add_library_reference(req.parent_library_id, req.child_library_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    async fn remove_library_reference(
        &self,
        request: Request<pb::RemoveLibraryReferenceRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .remove_library_reference(req.parent_library_id, req.child_library_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    async fn attach_library(
        &self,
        request: Request<pb::AttachLibraryRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .attach_library(req.sgc_id, req.library_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    async fn detach_library(
        &self,
        request: Request<pb::DetachLibraryRequest>,
    ) -> RpcResult<pb::LibraryMutationResponse> {
        let req = request.into_inner();
        let updated = self
            .state
            .catalog
            .detach_library(req.sgc_id, req.library_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::LibraryMutationResponse { updated }))
    }

    /// Find-or-create the installation and dispatch a download when the
    /// row is not already installed or in flight. A `failed` row is reset
    /// first: redelivery never auto-retries, this RPC is the explicit
    /// retry request.
    async fn install_addon(
        &self,
        request: Request<pb::InstallAddonRequest>,
    ) -> RpcResult<pb::WorkshopInstallation> {
        let req = request.into_inner();
        let addon = self
            .state
            .catalog
            .get_addon(req.addon_id)
            .await
            .map_err(to_status)?;
        // Deployment existence check up front so the error is NOT_FOUND.
        self.state
            .catalog
            .get_deployment(req.sgc_id)
            .await
            .map_err(to_status)?;
        let install_path = self
            .state
            .catalog
            .resolve_install_path(&addon)
            .await
            .map_err(to_status)?;
        let mut installation = self
            .state
            .catalog
            .find_or_create_installation(req.sgc_id, req.addon_id, &install_path)
            .await
            .map_err(to_status)?;

        match installation.status {
            InstallationStatus::Installed | InstallationStatus::Downloading => {}
            InstallationStatus::Failed | InstallationStatus::Removed => {
                installation = self
                    .state
                    .catalog
                    .reset_installation(installation.installation_id)
                    .await
                    .map_err(to_status)?;
                lifecycle::dispatch_download(&self.state, &installation)
                    .await
                    .map_err(to_status)?;
            }
            InstallationStatus::Pending => {
                lifecycle::dispatch_download(&self.state, &installation)
                    .await
                    .map_err(to_status)?;
            }
        }
        Ok(Response::new(installation_to_proto(installation)))
    }

    async fn get_installation(
        &self,
        request: Request<pb::GetInstallationRequest>,
    ) -> RpcResult<pb::WorkshopInstallation> {
        let installation = self
            .state
            .catalog
            .get_installation(request.into_inner().installation_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(installation_to_proto(installation)))
    }

    async fn list_installations(
        &self,
        request: Request<pb::ListInstallationsRequest>,
    ) -> RpcResult<pb::ListInstallationsResponse> {
        let req = request.into_inner();
        let page = page(req.page_size, &req.page_token)?;
        let status_in = req
            .status_in
            .iter()
            .map(|s| installation_status_from_proto(*s))
            .collect::<manman_core::Result<Vec<_>>>()
            .map_err(to_status)?;
        let installations = self
            .state
            .catalog
            .list_installations(req.sgc_id, &status_in, page)
            .await
            .map_err(to_status)?;
        let next_page_token = page.next_token(installations.len());
        Ok(Response::new(pb::ListInstallationsResponse {
            installations: installations
                .into_iter()
                .map(installation_to_proto)
                .collect(),
            next_page_token,
        }))
    }

    async fn get_deployment_addons(
        &self,
        request: Request<pb::GetDeploymentAddonsRequest>,
    ) -> RpcResult<pb::GetDeploymentAddonsResponse> {
        let views = lifecycle::deployment_addons(&self.state, request.into_inner().sgc_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetDeploymentAddonsResponse {
            addons: views
                .into_iter()
                .map(|view| pb::DeploymentAddon {
                    addon: Some(addon_to_proto(view.addon)),
                    installation: view.installation.map(installation_to_proto),
                    resolved_install_path: view.resolved_install_path,
                })
                .collect(),
        }))
    }
}
