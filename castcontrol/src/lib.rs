//! # castcontrol - Pilotage des renderers DLNA
//!
//! - [`DiscoveryService`] peuple le [`DeviceRegistry`] (SSDP + descriptions)
//! - [`UpnpControlClient`] traduit les intentions de lecture en actions SOAP
//! - [`GenaEventListener`] tient les abonnements GENA et livre des [`RemoteEvent`]
//! - [`CastController`] orchestre la session de cast et, en mode synchronisé,
//!   le [`SyncCoordinator`]

pub mod avtransport_client;
pub mod catalog;
pub mod control_client;
pub mod controller;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod interpretation;
pub mod model;
pub mod registry;
pub mod renderer_events;
pub mod rendering_control_client;
pub mod routes;
pub mod session;
pub mod settings;
pub mod soap_client;
pub mod sync;
pub mod time_utils;

pub use avtransport_client::{AvTransportClient, PositionInfo, TransportInfo};
pub use catalog::{ChannelCatalog, ChannelList};
pub use control_client::{ControlFactory, RendererControl, UpnpControlClient, UpnpControlFactory};
pub use controller::{CastController, ControllerDeps, ControllerSettings};
pub use discovery::{DescriptionProvider, DeviceSighting, DiscoveryService, DiscoveryStatus};
pub use errors::{CastError, FailureKind};
pub use events::{EventSource, EventSubscription};
pub use interpretation::{SkipInterpreter, SkipOrigin, SkipRequest};
pub use model::{
    Channel, DeviceId, DiscoveredDevice, PlaybackState, RemoteEvent, ServiceEndpoint,
    SwitchDirection, TransportState,
};
pub use registry::{DeviceRegistry, UpsertOutcome};
pub use renderer_events::GenaEventListener;
pub use rendering_control_client::RenderingControlClient;
pub use routes::StreamRoutes;
pub use session::{CastFailure, SessionPhase, SessionSnapshot, SessionUpdate};
pub use settings::{
    ControlSettings, DiscoverySettings, EventSettings, SessionSettings, SweepSettings, SyncSettings,
};
pub use soap_client::invoke_upnp_action;
pub use sync::{LocalPlayer, SyncCoordinator};
