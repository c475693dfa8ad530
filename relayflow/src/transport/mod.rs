//! Client seams to the external systems jobs are delivered to.
//!
//! The wire clients themselves are collaborators: a destination receives a
//! transport at construction and shares it across loads.

mod http;
#[cfg(feature = "postgres")]
mod postgres;
mod sql;
mod storage;

#[cfg(test)]
pub use http::MockHttpTransport;
#[cfg(feature = "http")]
pub use http::ReqwestTransport;
pub use http::{Body, HttpRequest, HttpResponse, HttpTransport, Method};
#[cfg(feature = "postgres")]
pub use postgres::PgConnection;
pub use sql::{SqlConnection, SqlTransaction};
pub use storage::{BlobBucket, BrokerMessage, DocumentCollection, TopicPublisher};
