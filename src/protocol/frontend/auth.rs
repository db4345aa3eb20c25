//! Password and SASL responses, plus the SCRAM-SHA-256 client exchange.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// PostgreSQL MD5 password: "md5" + md5(md5(password + username) + salt)
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(username.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{:x}", inner).as_bytes())
        .chain_update(salt)
        .finalize();

    format!("md5{:x}", outer)
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_nullable(Some(initial_response));
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SCRAM-SHA-256 client side of one authentication exchange.
///
/// Channel binding is not used (`n,,`).
pub struct ScramClient {
    nonce: String,
    password: String,
    auth_message: Option<String>,
    salted_password: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 18];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, STANDARD.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            nonce,
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// `n,,n=,r=<nonce>`. PostgreSQL takes the user from the startup packet.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Consume server-first-message, produce client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            match part.split_at_checked(2) {
                Some(("r=", value)) => nonce = Some(value),
                Some(("s=", value)) => salt = Some(value),
                Some(("i=", value)) => iterations = value.parse::<u32>().ok(),
                _ => {}
            }
        }

        let missing = |what: &str| Error::Auth(format!("Missing {} in server-first-message", what));
        let nonce = nonce.ok_or_else(|| missing("nonce"))?;
        let salt = salt.ok_or_else(|| missing("salt"))?;
        let iterations = iterations.ok_or_else(|| missing("iterations"))?;

        if !nonce.starts_with(&self.nonce) {
            return Err(Error::Auth(
                "Server nonce doesn't start with client nonce".into(),
            ));
        }
        let salt = STANDARD
            .decode(salt)
            .map_err(|e| Error::Auth(format!("Invalid salt: {}", e)))?;

        let mut salted_password = vec![0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", STANDARD.encode(b"n,,"), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );
        let signature = hmac(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Check the server signature in server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let encoded = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("Invalid server-final-message format".into()))?;
        let received = STANDARD
            .decode(encoded)
            .map_err(|e| Error::Auth(format!("Invalid server signature: {}", e)))?;

        let (Some(salted_password), Some(auth_message)) =
            (&self.salted_password, &self.auth_message)
        else {
            return Err(Error::Auth("server-final-message before server-first".into()));
        };

        let server_key = hmac(salted_password, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;

        if received != expected {
            return Err(Error::Auth("Server signature verification failed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_depends_on_salt() {
        let result = md5_password("postgres", "password", &[0x01, 0x02, 0x03, 0x04]);
        assert!(result.starts_with("md5"));
        assert_eq!(result.len(), 35);
        assert_eq!(
            result,
            md5_password("postgres", "password", &[0x01, 0x02, 0x03, 0x04])
        );
        assert_ne!(result, md5_password("postgres", "password", &[0, 0, 0, 0]));
    }

    // RFC 7677 test vector (user name left out, as PostgreSQL does).
    #[test]
    fn scram_rfc7677_proof() {
        let mut client = ScramClient::with_nonce("pencil", "rOprNGfwEbeRWgbNEkqO".into());
        assert_eq!(client.client_first_message(), "n,,n=,r=rOprNGfwEbeRWgbNEkqO");

        let server_first =
            "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let final_message = client.process_server_first(server_first).unwrap();
        assert!(final_message.starts_with(
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p="
        ));
    }

    #[test]
    fn scram_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce("pw", "abc".into());
        let err = client
            .process_server_first("r=zzz,s=QUJD,i=4096")
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn password_message() {
        let mut buf = Vec::new();
        write_password(&mut buf, "secret");
        assert_eq!(buf[0], b'p');
        assert!(buf.ends_with(b"secret\0"));
    }
}
