//! rvpatch - ReVanced patch manager
//!
//! Keeps a folder of APKs, per-APK patch selections and options, the
//! ReVanced tools, and builds and runs the patcher for each APK.

pub mod apk;
pub mod catalog;
pub mod command;
pub mod config;
pub mod runner;
pub mod store;
pub mod tools;
