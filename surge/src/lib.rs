#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod action;
pub mod body;
pub mod error;
pub(crate) mod executor;
pub mod injection;
pub mod scenario;
pub mod session;
pub mod simulation;
pub mod sink;
pub mod transport;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub mod http;
#[cfg(feature = "rt")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt")))]
pub mod runtime;

pub use error::SurgeError;
pub use scenario::{Chain, Scenario};
pub use session::{Session, Status};
pub use simulation::{RunHandle, Simulation};
pub use surge_core;

pub mod prelude {
    pub use crate::action::{delete, get, post, put, ActionError, Predicate, RequestAction};
    pub use crate::body::{MultipartSource, Part, RequestBodySource, StreamSource};
    pub use crate::error::SurgeError;
    pub use crate::injection::InjectionProfile;
    pub use crate::scenario::{Chain, Scenario};
    pub use crate::session::{Session, Status};
    pub use crate::simulation::{RunHandle, Simulation};
    pub use crate::sink::{ReportSink, RequestRecord, UserOutcome, UserReport};
    pub use crate::transport::{IoHandle, Method, Request, Response, Transport, TransportError};
    pub use surge_core::{Charset, OverflowPolicy, QueueConfig, RunConfig, RunStatistics};

    #[cfg(feature = "http")]
    pub use crate::http::ReqwestTransport;
    #[cfg(feature = "rt")]
    pub use crate::runtime::WithArgs;
}
