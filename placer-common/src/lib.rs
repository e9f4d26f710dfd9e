//! Shared geometry, entity, error, and collaborator-interface types for the
//! analytic global-placement engine.
//!
//! This crate owns nothing that moves during placement; it only defines the
//! vocabulary (`Rect`, `Instance`, `Pin`, `Net`, `Die`) and the trait
//! boundaries (`NetlistSource`, `NetlistSink`, `GlobalRouter`, `Resizer`,
//! `GraphicsSink`, `Fft2D`) that `placer-core` drives.

pub mod collab;
pub mod error;
pub mod geom;
pub mod netlist;

pub use collab::{
    Fft2D, GlobalRouter, GraphicsSink, NetlistSink, NetlistSource, NullGraphicsSink, RawBlockage,
    RawInstance, RawNet, RawPin, RawRegion, RawRow, RawSignalType, Resizer, RouteLayerUsage,
    RouteUsageGrid,
};
pub use error::{DivergeKind, PlaceError};
pub use geom::{Dbu, FloatPoint, Rect};
pub use netlist::{Die, Instance, InstanceId, Net, NetId, Pin, PinId, PinOwner, SignalType};
