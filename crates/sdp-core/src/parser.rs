//! SDP parsing
//!
//! Line-level parsing uses `nom`: each SDP line is `<type>=<value>` with
//! a single-character type. Attribute values are dispatched to small
//! per-attribute parsers; unknown attributes are preserved verbatim so a
//! parse/serialize round trip loses nothing the negotiator cares about.

use nom::character::complete::{anychar, char, not_line_ending};
use nom::IResult;

use crate::error::{Error, Result};
use crate::types::{
    Fingerprint, MediaDescription, MediaKind, Origin, RtpMap, SdpSetup, SessionDescription,
    SsrcAttribute,
};

/// Parse one SDP line into its type character and value
pub fn parse_sdp_line(input: &str) -> IResult<&str, (char, &str)> {
    let (input, key) = anychar(input)?;
    let (input, _) = char('=')(input)?;
    let (input, value) = not_line_ending(input)?;
    let input = input.trim_start_matches(['\r', '\n']);
    Ok((input, (key, value.trim())))
}

/// Parse a complete session description
pub fn parse_session_description(input: &str) -> Result<SessionDescription> {
    let mut origin = None;
    let mut session_name = "-".to_string();
    let mut saw_version = false;

    let mut sdp: Option<SessionDescription> = None;
    let mut pending_session_attrs: Vec<(String, Option<String>)> = Vec::new();
    let mut current_media: Option<MediaDescription> = None;

    let mut rest = input;
    while !rest.is_empty() {
        let Ok((next, (key, value))) = parse_sdp_line(rest) else {
            return Err(Error::Parse(format!("bad SDP line near: {rest:.40}")));
        };
        rest = next;

        match key {
            'v' => {
                if value != "0" {
                    return Err(Error::Parse(format!("unsupported SDP version: {value}")));
                }
                saw_version = true;
            }
            'o' => {
                origin = Some(parse_origin(value)?);
            }
            's' => {
                session_name = value.to_string();
            }
            // Session-level timing/connection carry no negotiation state
            't' | 'c' if current_media.is_none() => {}
            'c' => {
                if let Some(media) = current_media.as_mut() {
                    media.connection = parse_connection(value);
                }
            }
            'm' => {
                let sdp = sdp.get_or_insert_with(|| {
                    SessionDescription::new(origin.clone().unwrap_or_else(|| Origin::new("0.0.0.0")))
                });
                if let Some(finished) = current_media.take() {
                    sdp.media.push(finished);
                }
                current_media = Some(parse_media_line(value)?);
            }
            'a' => {
                let (name, attr_value) = split_attribute(value);
                match current_media.as_mut() {
                    Some(media) => apply_media_attribute(media, name, attr_value)?,
                    None => pending_session_attrs
                        .push((name.to_string(), attr_value.map(str::to_string))),
                }
            }
            // i=, u=, e=, p=, b=, z=, k=, r= carry nothing this layer uses
            _ => {}
        }
    }

    if !saw_version {
        return Err(Error::Parse("missing v= line".into()));
    }
    let origin = origin.ok_or_else(|| Error::Parse("missing o= line".into()))?;

    let mut sdp = sdp.unwrap_or_else(|| SessionDescription::new(origin.clone()));
    sdp.origin = origin;
    sdp.session_name = session_name;
    if let Some(media) = current_media.take() {
        sdp.media.push(media);
    }
    for (name, value) in pending_session_attrs {
        apply_session_attribute(&mut sdp, &name, value.as_deref())?;
    }
    Ok(sdp)
}

fn parse_origin(value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(Error::Parse(format!("short o= line: {value}")));
    }
    Ok(Origin {
        username: fields[0].to_string(),
        session_id: fields[1]
            .parse()
            .map_err(|_| Error::Parse(format!("bad session id: {}", fields[1])))?,
        session_version: fields[2]
            .parse()
            .map_err(|_| Error::Parse(format!("bad session version: {}", fields[2])))?,
        address: fields[5].to_string(),
    })
}

fn parse_connection(value: &str) -> Option<String> {
    // c=IN IP4 <address>
    value.split_whitespace().nth(2).map(str::to_string)
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(Error::Parse(format!("short m= line: {value}")));
    }
    let kind = MediaKind::from_token(fields[0])?;
    let port: u16 = fields[1]
        .parse()
        .map_err(|_| Error::Parse(format!("bad media port: {}", fields[1])))?;

    let mut media = MediaDescription::new(kind, port);
    media.protocol = fields[2].to_string();
    for format in &fields[3..] {
        let pt: u8 = format
            .parse()
            .map_err(|_| Error::Parse(format!("bad payload type: {format}")))?;
        media.formats.push(pt);
    }
    Ok(media)
}

/// Split an attribute value into name and optional value at the first `:`
fn split_attribute(value: &str) -> (&str, Option<&str>) {
    match value.split_once(':') {
        Some((name, rest)) => (name, Some(rest)),
        None => (value, None),
    }
}

fn apply_session_attribute(
    sdp: &mut SessionDescription,
    name: &str,
    value: Option<&str>,
) -> Result<()> {
    match (name, value) {
        ("group", Some(v)) => {
            let mut fields = v.split_whitespace();
            if fields.next() == Some("BUNDLE") {
                sdp.bundle = fields.map(str::to_string).collect();
            }
        }
        ("ice-ufrag", Some(v)) => sdp.ice_ufrag = Some(v.to_string()),
        ("ice-pwd", Some(v)) => sdp.ice_pwd = Some(v.to_string()),
        ("fingerprint", Some(v)) => sdp.fingerprint = Some(parse_fingerprint(v)?),
        _ => sdp
            .extra_attributes
            .push((name.to_string(), value.map(str::to_string))),
    }
    Ok(())
}

fn apply_media_attribute(
    media: &mut MediaDescription,
    name: &str,
    value: Option<&str>,
) -> Result<()> {
    match (name, value) {
        ("mid", Some(v)) => media.mid = Some(v.to_string()),
        ("rtpmap", Some(v)) => media.rtpmaps.push(parse_rtpmap(v)?),
        ("fmtp", Some(v)) => {
            let (pt, params) = v
                .split_once(' ')
                .ok_or_else(|| Error::Parse(format!("bad fmtp: {v}")))?;
            let pt: u8 = pt
                .parse()
                .map_err(|_| Error::Parse(format!("bad fmtp payload type: {pt}")))?;
            media.fmtps.push((pt, params.to_string()));
        }
        ("ssrc", Some(v)) => media.ssrcs.push(parse_ssrc(v)?),
        ("ice-ufrag", Some(v)) => media.ice_ufrag = Some(v.to_string()),
        ("ice-pwd", Some(v)) => media.ice_pwd = Some(v.to_string()),
        ("fingerprint", Some(v)) => media.fingerprint = Some(parse_fingerprint(v)?),
        ("setup", Some(v)) => media.setup = Some(SdpSetup::from_token(v)?),
        ("candidate", Some(v)) => media.candidates.push(v.to_string()),
        ("end-of-candidates", _) => media.end_of_candidates = true,
        ("rtcp-mux", _) => media.rtcp_mux = true,
        _ => media
            .extra_attributes
            .push((name.to_string(), value.map(str::to_string))),
    }
    Ok(())
}

/// Parse an `a=rtpmap` value: `<pt> <encoding>/<clock>[/<channels>]`
pub fn parse_rtpmap(value: &str) -> Result<RtpMap> {
    let (pt, spec) = value
        .split_once(' ')
        .ok_or_else(|| Error::Parse(format!("bad rtpmap: {value}")))?;
    let payload_type: u8 = pt
        .parse()
        .map_err(|_| Error::Parse(format!("bad rtpmap payload type: {pt}")))?;

    let mut parts = spec.split('/');
    let encoding = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Parse(format!("bad rtpmap encoding: {value}")))?
        .to_string();
    let clock_rate: u32 = parts
        .next()
        .ok_or_else(|| Error::Parse(format!("rtpmap without clock rate: {value}")))?
        .parse()
        .map_err(|_| Error::Parse(format!("bad rtpmap clock rate: {value}")))?;
    let channels = match parts.next() {
        Some(c) => Some(
            c.parse()
                .map_err(|_| Error::Parse(format!("bad rtpmap channels: {value}")))?,
        ),
        None => None,
    };

    Ok(RtpMap {
        payload_type,
        encoding,
        clock_rate,
        channels,
    })
}

/// Parse an `a=fingerprint` value: `<hash-func> <digest>`
pub fn parse_fingerprint(value: &str) -> Result<Fingerprint> {
    let (algorithm, digest) = value
        .split_once(' ')
        .ok_or_else(|| Error::Parse(format!("bad fingerprint: {value}")))?;
    if digest.is_empty() {
        return Err(Error::Parse("empty fingerprint digest".into()));
    }
    Ok(Fingerprint {
        algorithm: algorithm.to_string(),
        value: digest.to_string(),
    })
}

/// Parse an `a=ssrc` value: `<ssrc> <attribute>[:<value>]`
pub fn parse_ssrc(value: &str) -> Result<SsrcAttribute> {
    let (ssrc, rest) = value
        .split_once(' ')
        .ok_or_else(|| Error::Parse(format!("bad ssrc attribute: {value}")))?;
    let ssrc: u32 = ssrc
        .parse()
        .map_err(|_| Error::Parse(format!("bad ssrc: {value}")))?;
    let (attribute, attr_value) = match rest.split_once(':') {
        Some((name, v)) => (name.to_string(), Some(v.to_string())),
        None => (rest.to_string(), None),
    };
    Ok(SsrcAttribute {
        ssrc,
        attribute,
        value: attr_value,
    })
}
