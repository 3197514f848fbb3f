/// The ninebox application version.
///
/// In development builds, this defaults to the workspace Cargo package version. Release builds
/// inject the tag version via the `NINEBOX_VERSION` environment variable so a release can be cut
/// by tagging without editing `Cargo.toml`.
pub const NINEBOX_VERSION: &str = match option_env!("NINEBOX_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
