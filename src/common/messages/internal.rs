use serde::Serialize;
use serde_bytes::{ByteBuf, Bytes};

#[derive(Serialize, Debug)]
pub struct DHTQuery<'a, A> {
    #[serde(rename = "a")]
    pub arguments: A,

    #[serde(rename = "q")]
    pub verb: &'a str,

    #[serde(rename = "t")]
    pub transaction_id: &'a Bytes,

    #[serde(rename = "y")]
    pub kind: &'a str,
}

#[derive(Serialize, Debug)]
pub struct DHTReply<'a, R> {
    #[serde(rename = "r")]
    pub arguments: R,

    #[serde(rename = "t")]
    pub transaction_id: &'a Bytes,

    #[serde(rename = "y")]
    pub kind: &'a str,
}

#[derive(Serialize, Debug)]
pub struct DHTIdArguments<'a> {
    pub id: &'a Bytes,
}

#[derive(Serialize, Debug)]
pub struct DHTFindNodeRequestArguments<'a> {
    pub id: &'a Bytes,
    pub target: &'a Bytes,
}

#[derive(Serialize, Debug)]
pub struct DHTGetPeersRequestArguments<'a> {
    pub id: &'a Bytes,
    pub info_hash: &'a Bytes,
}

#[derive(Serialize, Debug)]
pub struct DHTAnnouncePeerRequestArguments<'a> {
    pub id: &'a Bytes,
    pub info_hash: &'a Bytes,
    pub port: u16,
    pub token: &'a Bytes,
}

#[derive(Serialize, Debug)]
pub struct DHTNodesResponseArguments<'a> {
    pub id: &'a Bytes,
    pub nodes: &'a Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<&'a Bytes>,
}

#[derive(Serialize, Debug)]
pub struct DHTValuesResponseArguments<'a> {
    pub id: &'a Bytes,
    pub token: &'a Bytes,
    pub values: Vec<ByteBuf>,
}

#[derive(Serialize, Debug)]
pub struct DHTEncrypted<'a> {
    #[serde(rename = "a")]
    pub ciphertext: &'a Bytes,
    #[serde(rename = "s")]
    pub salt: &'a Bytes,
}
