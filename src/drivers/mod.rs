pub mod control;
pub mod outputs;
pub mod packet;
pub mod px4io;
pub mod rc_input;
pub mod status;
pub mod transport;
