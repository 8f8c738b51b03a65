pub mod admin;
pub mod sendgrid;

pub use admin::{CommerceClient, CommerceError, ProductResource, VariantResource};
pub use sendgrid::{SendGridClient, SendGridError, Sender};
