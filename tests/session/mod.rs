//! Session lifecycle tests over real sockets.

mod direct_tests;
mod proxy_tests;
