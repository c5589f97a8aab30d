//! Admin commands
//!
//! Each command is a plain data struct with `validate()` plus a standalone
//! `handle` function that runs it against the catalog repositories.

pub mod galleries;
pub mod site_actions;

pub use galleries::{CreateGalleryCommand, CreateGalleryError};
pub use site_actions::{
    orphaned_photos, ActionReport, OrphanReport, Selection, SiteAction, SiteActionError, SiteCommand,
};
