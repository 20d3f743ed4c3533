//! Password authentication.
//!
//! MD5 is the only hashed scheme the handshake answers; cleartext requests
//! get the password as-is.

/// Compute the MD5 password response: `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{}{}", password, user).as_bytes());

    let mut outer_input = format!("{:x}", inner).into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer = md5::compute(&outer_input);

    format!("md5{:x}", outer)
}
