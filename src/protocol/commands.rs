use paste::paste;

use crate::protocol::packet::PacketBuf;

/// Common imports used by >50% of all packet parsers.
///
/// Do not clutter this prelude with types only used by a few packets.
pub(self) mod prelude {
    pub use crate::protocol::commands::ParseCommand;
    pub use crate::protocol::common::hex::decode_hex;
    pub use crate::protocol::common::hex::decode_hex_buf;
    pub use crate::protocol::packet::PacketBuf;
}

pub trait ParseCommand<'a>: Sized {
    /// Try to parse a packet from the packet buffer.
    fn from_packet(buf: PacketBuf<'a>) -> Option<Self>;
}

macro_rules! commands {
    (
        $(
            $ext:ident $(use $lt:lifetime)? {
                $($name:literal => $mod:ident::$command:ident$(<$lifetime:lifetime>)?,)*
            }
        )*
    ) => {paste! {
        $($(
            #[allow(non_snake_case, non_camel_case_types)]
            pub mod $mod;
        )*)*

        pub mod ext {
            $(
                #[allow(non_camel_case_types, clippy::enum_variant_names)]
                pub enum [<$ext:camel>] $(<$lt>)? {
                    $($command(super::$mod::$command<$($lifetime)?>),)*
                }
            )*
        }

        /// GDB commands, grouped by the server subsystem that handles them.
        pub enum Command<'a> {
            $(
                [<$ext:camel>](ext::[<$ext:camel>]$(<$lt>)?),
            )*
            Unknown(&'a [u8]),
        }

        impl<'a> Command<'a> {
            pub fn from_packet(mut buf: PacketBuf<'a>) -> Option<Command<'a>> {
                if buf.as_body().is_empty() {
                    return None;
                }

                // each prefix is tried in declaration order; no recognized
                // packet name is a prefix of another, so first match wins
                $($(
                #[allow(clippy::string_lit_as_bytes)]
                if buf.strip_prefix($name.as_bytes()) {
                    let cmd = $mod::$command::from_packet(buf)?;

                    return Some(
                        Command::[<$ext:camel>](
                            ext::[<$ext:camel>]::$command(cmd)
                        )
                    )
                }
                )*)*

                Some(Command::Unknown(buf.into_body()))
            }
        }
    }};
}

commands! {
    base use 'a {
        "!" => exclamation_mark::ExclamationMark,
        "?" => question_mark::QuestionMark,
        "D" => _d_upcase::D,
        "g" => _g::g,
        "G" => _g_upcase::G<'a>,
        "H" => _h_upcase::H,
        "k" => _k::k,
        "m" => _m::m,
        "M" => _m_upcase::M<'a>,
        "p" => _p::p,
        "P" => _p_upcase::P<'a>,
        "qAttached" => _qAttached::qAttached,
        "qC" => _qC::qC,
        "qfThreadInfo" => _qfThreadInfo::qfThreadInfo,
        "qsThreadInfo" => _qsThreadInfo::qsThreadInfo,
        "qSupported" => _qSupported::qSupported<'a>,
        "qThreadExtraInfo" => _qThreadExtraInfo::qThreadExtraInfo,
        "qOffsets" => _qOffsets::qOffsets,
        "R" => _r_upcase::R,
        "T" => _t_upcase::T,
        "vAttach" => _vAttach::vAttach,
        "vRun" => _vRun::vRun<'a>,
        "X" => _x_upcase::X<'a>,
    }

    resume use 'a {
        "c" => _c::c,
        "C" => _c_upcase::C,
        "s" => _s::s,
        "S" => _s_upcase::S,
        "vCont" => _vCont::vCont<'a>,
        "vStopped" => _vStopped::vStopped,
    }

    breakpoints {
        "z" => _z::z,
        "Z" => _z_upcase::Z,
    }

    monitor_cmd use 'a {
        "qRcmd" => _qRcmd::qRcmd<'a>,
    }

    xfer use 'a {
        "qXfer:features:read" => _qXfer_features_read::qXferFeaturesRead<'a>,
        "qXfer:osdata:read" => _qXfer_osdata_read::qXferOsdataRead<'a>,
    }

    host_io {
        "F" => _f_upcase::F,
    }
}
