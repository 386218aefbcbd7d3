//! gRPC module for production-invoicing-service.

mod convert;
mod service;

pub use service::ProductionInvoicingServiceImpl;
pub use service_core::grpc::trace_context_interceptor;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("millwork.production_invoicing.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("production_invoicing_descriptor");
}
