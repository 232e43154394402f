mod helpers;
mod integration_tests;
mod prop_tests;
