//! End-to-end RSP sessions over a scripted connection and a mock mesh.

mod common;

use common::frame;
use common::responses;
use common::MeshTarget;
use common::ScriptedConnection;

use eserver::arch;
use eserver::stub::DebugMode;
use eserver::stub::DisconnectReason;
use eserver::stub::GdbServer;
use eserver::stub::ServerSettings;

fn settings(debug_mode: DebugMode) -> ServerSettings {
    ServerSettings {
        debug_mode,
        multiprocess: true,
    }
}

fn hex(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Push one framed request plus the acks the client owes for the server's
/// replies to it.
fn push_req(input: &mut Vec<u8>, body: &str, acks: usize) {
    input.extend(frame(body));
    input.extend(std::iter::repeat(b'+').take(acks));
}

fn run_session(
    mut target: &mut MeshTarget,
    debug_mode: DebugMode,
    input: Vec<u8>,
) -> Vec<String> {
    let mut conn = ScriptedConnection::new(input);
    {
        let mut server = GdbServer::new(&mut target, &mut conn, settings(debug_mode));
        let reason = server.run().expect("session should end with the kill packet");
        assert_eq!(reason, DisconnectReason::Kill);
    }
    responses(&conn.output)
}

/// The standard opening: negotiate multiprocess, build a 1x2 workgroup out
/// of cores (32,8) and (32,9) (process 2, threads 2 and 3), and attach.
fn attach_workgroup(input: &mut Vec<u8>) {
    push_req(input, "qSupported:multiprocess+;swbreak+", 1);
    // qRcmd replies with an `O` console packet and then OK
    push_req(input, &format!("qRcmd,{}", hex("workgroup 32 8 1 2")), 2);
    push_req(input, "vAttach;2", 1);
}

#[test]
fn attach_and_list_threads() {
    let mut target = MeshTarget::new(2, 2);

    let mut input = Vec::new();
    push_req(&mut input, "qSupported:multiprocess+;xmlRegisters=i386", 1);
    push_req(&mut input, "qfThreadInfo", 1);
    push_req(&mut input, "qsThreadInfo", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert!(resp[0].contains("multiprocess+"), "got {:?}", resp[0]);
    assert!(resp[0].contains("qXfer:osdata:read+"));
    assert!(resp[0].contains("PacketSize="));
    assert_eq!(resp[1], "mp1.2,p1.3,p1.4,p1.5");
    assert_eq!(resp[2], "l");
}

#[test]
fn unknown_packets_get_the_empty_reply() {
    let mut target = MeshTarget::new(1, 1);

    let mut input = Vec::new();
    push_req(&mut input, "vMustReplyEmpty", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);
    assert_eq!(resp[0], "");
}

#[test]
fn single_step_across_a_branch() {
    let mut target = MeshTarget::new(2, 2);
    let core = MeshTarget::core(32, 8);

    // the branch is taken: the core "executes" the planted BKPT at 0x1008
    // and halts just past it
    target.schedule_stop(core, 0x100a);

    let mut input = Vec::new();
    attach_workgroup(&mut input);
    push_req(&mut input, "Hgp2.2", 1);
    // 16-bit branch, displacement +4: taken destination 0x1008
    push_req(&mut input, "M1000,2:2204", 1);
    // PC (reg 0x42) <- 0x1000
    push_req(&mut input, "P42=00100000", 1);
    push_req(&mut input, "vCont;s:p2.2", 1);
    push_req(&mut input, "m1000,2", 1);
    push_req(&mut input, "m1002,2", 1);
    push_req(&mut input, "m1008,2", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    // resp[0..3]: qSupported, the workgroup console output, its OK
    assert_eq!(resp[3], "T05thread:p2.2;"); // vAttach stop
    assert_eq!(resp[4], "OK"); // Hg
    assert_eq!(resp[5], "OK"); // M
    assert_eq!(resp[6], "OK"); // P
    assert_eq!(resp[7], "T05thread:p2.2;"); // the step stop
    assert_eq!(resp[8], "2204"); // branch instruction intact
    assert_eq!(resp[9], "0000"); // fall-through restored
    assert_eq!(resp[10], "0000"); // taken destination restored

    // the reported PC is the matchpoint address, not one past it
    assert_eq!(target.reg(core, arch::PC_REGNUM), 0x1008);
}

#[test]
fn memory_read_translates_local_addresses() {
    let mut target = MeshTarget::new(2, 2);
    target.poke(0x808f_0000, &[0xde, 0xad, 0xbe, 0xef]);

    let mut input = Vec::new();
    push_req(&mut input, "mf0000,4", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);
    assert_eq!(resp[0], "deadbeef");
}

#[test]
fn refused_addresses_report_e02() {
    let mut target = MeshTarget::new(1, 1);

    let mut input = Vec::new();
    // far outside every window
    push_req(&mut input, "m40000000,4", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);
    assert_eq!(resp[0], "E02");
}

#[test]
fn ctrl_c_during_continue_halts_the_process() {
    let mut target = MeshTarget::new(2, 2);
    // no scheduled stop: the core just keeps running

    let mut input = Vec::new();
    attach_workgroup(&mut input);
    input.extend(frame("vCont;c:p2.2"));
    input.push(0x03); // the in-band break
    input.push(b'+'); // ack for the stop reply
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert_eq!(resp.last().unwrap(), "T02thread:p2.2;");
    assert!(target.is_core_halted(MeshTarget::core(32, 8)));
    assert!(target.is_core_halted(MeshTarget::core(32, 9)));
}

#[test]
fn non_stop_reports_one_stop_and_keeps_the_rest_running() {
    let mut target = MeshTarget::new(2, 2);
    let stopper = MeshTarget::core(32, 8);
    let runner = MeshTarget::core(32, 9);

    target.schedule_stop(stopper, 0x2002);

    let mut input = Vec::new();
    attach_workgroup(&mut input);
    push_req(&mut input, "vCont;c:p2.2;c:p2.3", 1);
    push_req(&mut input, "vStopped", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::NonStop, input);

    assert_eq!(resp[resp.len() - 2], "T05thread:p2.2;");
    assert_eq!(resp.last().unwrap(), "OK");

    // the second core was never halted behind the client's back
    assert!(!target.is_core_halted(runner));
    assert_eq!(target.debug_cmds.last(), Some(&(runner.raw(), 0)));
}

#[test]
fn semihosted_write_is_relayed_and_resumed() {
    let mut target = MeshTarget::new(2, 2);
    let core = MeshTarget::core(32, 8);

    // TRAP (code 0 = write) at 0x3000; the core halts just past it, and
    // after the syscall is serviced it runs on to an ordinary stop
    target.poke(core.global_base() + 0x3000, &[0xe2, 0x03]);
    target.schedule_stop(core, 0x3002);
    target.schedule_stop(core, 0x4002);

    target.set_reg(core, 0, 1); // fd
    target.set_reg(core, 1, 0x2000); // buf
    target.set_reg(core, 2, 5); // len
    target.poke(core.global_base() + 0x2000, b"hi!\n\0");

    let mut input = Vec::new();
    attach_workgroup(&mut input);
    input.extend(frame("vCont;c:p2.2"));
    input.push(b'+'); // ack for the Fwrite request
    input.extend(frame("F5")); // host wrote 5 bytes
    input.push(b'+'); // ack for the final stop reply
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert!(resp.contains(&"Fwrite,1,2000,5".to_string()));
    assert_eq!(resp.last().unwrap(), "T05thread:p2.2;");
    // the syscall's return value landed in R0
    assert_eq!(target.reg(core, 0), 5);
}

#[test]
fn semihosted_exit_reports_term_without_resuming() {
    let mut target = MeshTarget::new(2, 2);
    let core = MeshTarget::core(32, 8);

    // TRAP code 3 = exit, status in R0
    let trap_exit: u16 = (3 << 10) | 0x03e2;
    target.poke(core.global_base() + 0x3000, &trap_exit.to_le_bytes());
    target.schedule_stop(core, 0x3002);
    target.set_reg(core, 0, 42);

    let mut input = Vec::new();
    attach_workgroup(&mut input);
    push_req(&mut input, "vCont;c:p2.2", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);
    assert_eq!(resp.last().unwrap(), "T0fthread:p2.2;");
}

#[test]
fn breakpoint_insert_remove_restores_memory() {
    let mut target = MeshTarget::new(2, 2);
    let addr = 0x8080_1000;
    target.poke(addr, &[0x22, 0x04]);

    let mut input = Vec::new();
    push_req(&mut input, "Z0,1000,2", 1);
    push_req(&mut input, "z0,1000,2", 1);
    // removing an absent matchpoint is a non-error
    push_req(&mut input, "z0,1000,2", 1);
    // hardware watchpoints are unsupported: empty reply
    push_req(&mut input, "Z2,1000,4", 1);
    input.extend(frame("k"));

    let mut conn = ScriptedConnection::new(input);
    {
        let mut server = GdbServer::new(&mut target, &mut conn, settings(DebugMode::AllStop));
        server.run().expect("clean kill");
    }
    let resp = responses(&conn.output);

    assert_eq!(resp[0], "OK");
    assert_eq!(resp[1], "OK");
    assert_eq!(resp[2], "OK");
    assert_eq!(resp[3], "");
    assert_eq!(target.peek_mem(addr, 2), vec![0x22, 0x04]);
}

#[test]
fn breakpoint_swaps_in_a_bkpt() {
    let mut target = MeshTarget::new(2, 2);
    let addr = 0x8080_1000;
    target.poke(addr, &[0x22, 0x04]);

    let mut input = Vec::new();
    push_req(&mut input, "Z0,1000,2", 1);
    input.extend(frame("k"));

    run_session(&mut target, DebugMode::AllStop, input);
    assert_eq!(target.peek_mem(addr, 2), vec![0xc2, 0x01]);
}

#[test]
fn register_read_write_round_trips() {
    let mut target = MeshTarget::new(1, 1);
    let core = MeshTarget::core(32, 8);
    target.set_reg(core, 1, 0xdead_beef);
    target.set_reg(core, arch::PC_REGNUM, 0x1000);

    // expected `g` payload: 106 registers, LE hex
    let mut expected = String::new();
    for regnum in 0..arch::NUM_REGS {
        let val = target.reg(core, regnum);
        for byte in val.to_le_bytes() {
            expected.push_str(&format!("{:02x}", byte));
        }
    }

    let mut input = Vec::new();
    push_req(&mut input, "g", 1);
    push_req(&mut input, &format!("G{}", expected), 1);
    push_req(&mut input, "g", 1);
    push_req(&mut input, "p1", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert_eq!(resp[0], expected);
    assert_eq!(resp[1], "OK");
    assert_eq!(resp[2], expected, "g/G round trip changed registers");
    assert_eq!(resp[3], "efbeadde");
}

#[test]
fn memory_write_round_trips_hex_and_binary() {
    let mut target = MeshTarget::new(1, 1);

    let mut input = Vec::new();
    push_req(&mut input, "M8e000000,4:cafebabe", 1);
    push_req(&mut input, "m8e000000,4", 1);
    // same payload through the binary packet
    let mut x = frame("X8e000010,4:").to_vec();
    // splice the binary payload ahead of the checksum
    x.truncate(x.len() - 3);
    x.extend(&[0xca, 0xfe, 0xba, 0xbe]);
    let checksum = x[1..].iter().fold(0u8, |a, b| a.wrapping_add(*b));
    x.push(b'#');
    x.extend(format!("{:02x}", checksum).into_bytes());
    input.extend(x);
    input.push(b'+');
    push_req(&mut input, "m8e000010,4", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert_eq!(resp[0], "OK");
    assert_eq!(resp[1], "cafebabe");
    assert_eq!(resp[2], "OK");
    assert_eq!(resp[3], "cafebabe");

    assert_eq!(
        target.peek_mem(0x8e00_0000, 4),
        target.peek_mem(0x8e00_0010, 4)
    );
}

#[test]
fn osdata_lists_processes() {
    let mut target = MeshTarget::new(2, 2);

    let mut input = Vec::new();
    push_req(&mut input, "qXfer:osdata:read::0,1000", 1);
    push_req(&mut input, "qXfer:osdata:read:processes:0,1000", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);

    assert!(resp[0].starts_with('l') || resp[0].starts_with('m'));
    assert!(resp[0].contains("processes"));
    assert!(resp[1].contains("<column name=\"pid\">1</column>"));
    assert!(resp[1].contains("idle"));
}

#[test]
fn target_xml_is_served() {
    let mut target = MeshTarget::new(1, 1);

    let mut input = Vec::new();
    push_req(&mut input, "qXfer:features:read:target.xml:0,1000", 1);
    input.extend(frame("k"));

    let resp = run_session(&mut target, DebugMode::AllStop, input);
    assert!(resp[0].contains("<architecture>epiphany</architecture>"));
}
