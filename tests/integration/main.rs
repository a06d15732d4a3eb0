mod dns_providers;
mod issuance;
