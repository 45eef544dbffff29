mod batch_step_tests;
mod fakes;
