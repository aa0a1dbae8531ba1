mod support;
mod test_container;
mod test_controller;
mod test_extract;
mod test_server;
mod test_strategy;
