//! BUCP login against the OSCAR auth service.
//!
//! The exchange is strictly sequential: signon frames, challenge, login. On success the service
//! names the BOS (relay) host to connect to and the cookie to present there.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::wire::{
    login_tag, BucpChallengeRequest, BucpChallengeResponse, BucpLoginRequest, BucpLoginResponse,
    FlapClient, Tlv, TlvList, WireError,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unable to {step}: {source}")]
    Wire {
        step: &'static str,
        #[source]
        source: WireError,
    },
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("authentication error code {0}")]
    Code(u16),
    #[error("login response does not contain a relay host")]
    MissingRelayHost,
    #[error("login response does not contain an auth cookie")]
    MissingCookie,
}

fn at(step: &'static str) -> impl FnOnce(WireError) -> AuthError {
    move |source| AuthError::Wire { step, source }
}

/// Where to go after login and what to present there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub relay_host: String,
    pub cookie: Bytes,
}

/// Log `screen_name` in and return the relay host and session cookie.
pub async fn authenticate<R, W>(
    flapc: &mut FlapClient<R, W>,
    screen_name: &str,
    password: &str,
) -> Result<Credentials, AuthError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    flapc
        .receive_signon_frame()
        .await
        .map_err(at("receive signon frame"))?;
    flapc
        .send_signon_frame(&TlvList::new())
        .await
        .map_err(at("send signon frame"))?;

    let challenge_request = BucpChallengeRequest {
        tlvs: TlvList::new().with(Tlv::string(login_tag::SCREEN_NAME, screen_name)),
    };
    flapc
        .send_snac(&challenge_request)
        .await
        .map_err(at("send challenge request"))?;

    let (_, challenge) = flapc
        .receive_snac::<BucpChallengeResponse>()
        .await
        .map_err(at("receive challenge response"))?;

    let hash = crate::wire::strong_md5_password_hash(password, &challenge.auth_key);
    let login_request = BucpLoginRequest {
        tlvs: TlvList::new()
            .with(Tlv::string(login_tag::SCREEN_NAME, screen_name))
            .with(Tlv::new(login_tag::PASSWORD_HASH, hash)),
    };
    flapc
        .send_snac(&login_request)
        .await
        .map_err(at("send login request"))?;

    let (_, login_response) = flapc
        .receive_snac::<BucpLoginResponse>()
        .await
        .map_err(at("receive login response"))?;

    credentials_from(&login_response.tlvs)
}

fn credentials_from(tlvs: &TlvList) -> Result<Credentials, AuthError> {
    if let Some(code) = tlvs.uint16(login_tag::ERROR_SUBCODE) {
        return Err(match code {
            login_tag::ERR_INVALID_USERNAME_OR_PASSWORD => AuthError::InvalidCredentials,
            other => AuthError::Code(other),
        });
    }
    let relay_host = tlvs
        .string(login_tag::RECONNECT_HERE)
        .filter(|h| !h.is_empty())
        .ok_or(AuthError::MissingRelayHost)?;
    let cookie = tlvs
        .bytes(login_tag::AUTHORIZATION_COOKIE)
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or(AuthError::MissingCookie)?;
    Ok(Credentials { relay_host, cookie })
}
