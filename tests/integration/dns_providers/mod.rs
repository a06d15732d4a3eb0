#[cfg(feature = "integration-tests")]
mod cloudflare_test;
mod memory_test;
#[cfg(feature = "integration-tests")]
mod test_utils;
