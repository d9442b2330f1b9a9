pub mod mask;
pub mod mask_builder;
pub mod mask_design;
pub mod mask_spec;

pub mod csu;
pub mod keyword_hal;
pub mod keyword_hal_mock;
pub mod poll_machine;
