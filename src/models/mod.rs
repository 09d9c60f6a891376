pub mod credential_model;
