pub mod benchmark;
pub mod fib;
pub mod interest;
pub mod newface;
pub mod ping;
pub mod prefixreg;
pub mod publish;
