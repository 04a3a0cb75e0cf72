// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handshake layer: accept an incoming request as either a classic HTTP/1.1
//! WebSocket upgrade or an HTTP/2 extended CONNECT (`:protocol`), negotiate
//! the permessage-deflate extension, and hand back the response plus the
//! transport the session will run on.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, Method, Response, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::codec::deflate::DeflateParams;
use crate::transport::H2Stream;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const EXTENSION_NAME: &str = "permessage-deflate";

/// The transport side of an accepted handshake. The h1 transport only
/// materializes once the 101 response has gone out.
pub(crate) enum PendingTransport {
    H1(hyper::upgrade::OnUpgrade),
    H2(Box<H2Stream>),
}

pub(crate) struct Accepted {
    pub response: Response<Body>,
    pub transport: PendingTransport,
    pub deflate: Option<DeflateParams>,
}

/// Compute the Sec-WebSocket-Accept value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(client_key.as_bytes());
    sha.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// One offered extension from a Sec-WebSocket-Extensions header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtensionOffer {
    pub name: String,
    pub params: Vec<(String, Option<String>)>,
}

/// Parse a Sec-WebSocket-Extensions header value into its offers.
pub(crate) fn parse_extension_offers(value: &str) -> Vec<ExtensionOffer> {
    value
        .split(',')
        .filter_map(|offer| {
            let mut parts = offer.split(';').map(str::trim);
            let name = parts.next()?.to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            let params = parts
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (
                        k.trim().to_ascii_lowercase(),
                        Some(v.trim().trim_matches('"').to_owned()),
                    ),
                    None => (p.to_ascii_lowercase(), None),
                })
                .collect();
            Some(ExtensionOffer { name, params })
        })
        .collect()
}

/// Outcome of permessage-deflate negotiation: the parameters both sides will
/// use and the Sec-WebSocket-Extensions value to echo back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub params: DeflateParams,
    pub header: String,
}

/// Pick the first acceptable permessage-deflate offer, folding the client's
/// requested parameters into the server's configured baseline. Offers asking
/// for a reduced server window are skipped (the deflater always runs the
/// full 32 KiB window); a client window hint is fine since the inflater
/// handles anything up to the full window.
pub(crate) fn negotiate_deflate(requested: DeflateParams, header: &str) -> Option<Negotiated> {
    'offer: for offer in parse_extension_offers(header) {
        if offer.name != EXTENSION_NAME {
            continue;
        }
        let mut params = requested;
        for (key, value) in &offer.params {
            match key.as_str() {
                "client_no_context_takeover" => params.client_no_context_takeover = true,
                "server_no_context_takeover" => params.server_no_context_takeover = true,
                "client_max_window_bits" => {}
                "server_max_window_bits" => {
                    if value.as_deref() != Some("15") {
                        continue 'offer;
                    }
                }
                _ => continue 'offer,
            }
        }
        return Some(Negotiated { params, header: response_header(params) });
    }
    None
}

fn response_header(params: DeflateParams) -> String {
    let mut header = String::from(EXTENSION_NAME);
    if params.server_no_context_takeover {
        header.push_str("; server_no_context_takeover");
    }
    if params.client_no_context_takeover {
        header.push_str("; client_no_context_takeover");
    }
    header
}

/// First token of the first Sec-WebSocket-Protocol header, to be echoed
/// back verbatim. The server does not select beyond echoing.
fn offered_protocol(req: &Request) -> Option<String> {
    let value = req.headers().get(header::SEC_WEBSOCKET_PROTOCOL)?;
    let first = value.to_str().ok()?.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_owned())
    }
}

fn header_contains_token(req: &Request, name: header::HeaderName, token: &str) -> bool {
    req.headers()
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn collected_extensions(req: &Request) -> String {
    req.headers()
        .get_all(header::SEC_WEBSOCKET_EXTENSIONS)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ")
}

fn bad_request(reason: &'static str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(reason))
        .expect("static response must build")
}

/// Accept the request on one of the two upgrade paths. On error the returned
/// response is sent as-is and no session is started.
pub(crate) fn upgrade(
    mut req: Request,
    requested_deflate: Option<DeflateParams>,
) -> Result<Accepted, Response<Body>> {
    let negotiated = match requested_deflate {
        Some(requested) => {
            let offers = collected_extensions(&req);
            if offers.is_empty() {
                None
            } else {
                negotiate_deflate(requested, &offers)
            }
        }
        None => None,
    };
    let protocol = offered_protocol(&req);

    let extended_connect = req.method() == Method::CONNECT
        && req.extensions().get::<hyper::ext::Protocol>().is_some();

    if extended_connect {
        let remote_addr =
            req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
        let (stream, response_body) = H2Stream::new(req.into_body(), None, remote_addr);

        let mut response = Response::builder().status(StatusCode::OK);
        if let Some(protocol) = &protocol {
            response = response.header(header::SEC_WEBSOCKET_PROTOCOL, protocol.as_str());
        }
        if let Some(negotiated) = &negotiated {
            response =
                response.header(header::SEC_WEBSOCKET_EXTENSIONS, negotiated.header.as_str());
        }
        let response = response
            .body(response_body)
            .map_err(|_| bad_request("malformed handshake headers"))?;

        return Ok(Accepted {
            response,
            transport: PendingTransport::H2(Box::new(stream)),
            deflate: negotiated.map(|n| n.params),
        });
    }

    // Classic HTTP/1.1 upgrade.
    if req.method() != Method::GET {
        return Err(bad_request("websocket upgrade requires GET"));
    }
    if !header_contains_token(&req, header::UPGRADE, "websocket")
        || !header_contains_token(&req, header::CONNECTION, "upgrade")
    {
        return Err(bad_request("not a websocket upgrade request"));
    }
    let version_ok = req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .is_some_and(|v| v.as_bytes() == b"13");
    if !version_ok {
        return Err(bad_request("unsupported websocket version"));
    }
    let key = match req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) => key.to_owned(),
        None => return Err(bad_request("missing Sec-WebSocket-Key")),
    };
    let Some(on_upgrade) = req.extensions_mut().remove::<hyper::upgrade::OnUpgrade>() else {
        return Err(bad_request("connection does not support upgrades"));
    };

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key(&key));
    if let Some(protocol) = &protocol {
        response = response.header(header::SEC_WEBSOCKET_PROTOCOL, protocol.as_str());
    }
    if let Some(negotiated) = &negotiated {
        response = response.header(header::SEC_WEBSOCKET_EXTENSIONS, negotiated.header.as_str());
    }
    let response = response
        .body(Body::empty())
        .map_err(|_| bad_request("malformed handshake headers"))?;

    Ok(Accepted {
        response,
        transport: PendingTransport::H1(on_upgrade),
        deflate: negotiated.map(|n| n.params),
    })
}

#[cfg(test)]
#[path = "upgrade_tests.rs"]
mod tests;
