mod extractor_test;
mod finalizer_test;
mod pipeline_test;
mod provisioner_test;
mod validator_test;
