//! Production Invoicing Service - deposit and final invoices for production
//! orders, payment recording with production side effects, and best-effort
//! accounting sync.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
