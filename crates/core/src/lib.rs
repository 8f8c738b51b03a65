//! Domain layer shared by the HTTP surface and the event subscribers.
//!
//! Everything here is pure: no I/O, no clocks. Callers pass in the current
//! date or the freshly fetched entity.

pub mod invoice;
pub mod metadata;
pub mod notification;
pub mod pdf;
pub mod projection;
pub mod size_chart;
pub mod workflow;

pub use invoice::{build_invoice, invoice_number, InvoiceDocument, InvoiceError, Seller};
pub use metadata::{merge_patch, HexColor, Metadata, MetadataError, MetadataPatch};
pub use notification::{Attachment, NotificationDispatch};
pub use projection::{format_address, OrderProjection, ShipmentProjection};
pub use size_chart::{SizeChart, SizeChartEdit, SizeChartError};
pub use workflow::{ExecutionStatus, StepStatus, TransactionLog, WorkflowLogError};
