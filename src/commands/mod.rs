pub mod add;
pub mod clear;
pub mod remove;
pub mod run;
pub mod status;
