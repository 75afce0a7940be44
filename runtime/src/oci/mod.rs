//! OCI image layouts, archives and registries.

mod archive;
mod layout;
mod registry;

pub use archive::OciArchiveProvider;
pub use layout::{OciLayout, OciLayoutProvider, REF_NAME_ANNOTATION};
pub use registry::RegistryProvider;

#[cfg(test)]
pub(crate) use layout::tests::write_layout;
