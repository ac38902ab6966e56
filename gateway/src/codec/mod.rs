//! Wire codecs for the device protocol: C1 (framing), C2 (IMEI), C3 (AVL
//! frames + CRC), C4 (IO elements).

pub mod avl;
pub mod framing;
pub mod imei;
pub mod io;
