//! End-to-end block map construction over assembled methods.

use bcmap_bytecode::opcodes::*;
use bcmap_bytecode::{Assembler, ByteStream, BytecodeStream, ExceptionHandler, MethodCode};
use bcmap_cfg::{
    AFTER_EXCEPTION_BCI, Bailout, BlockId, BlockMap, BlockMapError, BlockMapOptions,
    LOOP_HEADER_MAX_CAPACITY, build_all,
};

fn build_with(
    code: &[u8],
    handlers: Vec<ExceptionHandler>,
    options: &BlockMapOptions,
) -> Result<BlockMap, BlockMapError> {
    let method = MethodCode::new("test", code.to_vec()).with_handlers(handlers);
    BlockMap::build_method(&method, options)
}

fn build(code: &[u8], handlers: Vec<ExceptionHandler>) -> BlockMap {
    build_with(code, handlers, &BlockMapOptions::default()).unwrap()
}

/// Final ids equal positions.
const fn id(position: usize) -> BlockId {
    BlockId::new(position)
}

/// Every instruction of `code` is mapped to a block that contains it.
///
/// Only for methods without unreachable instructions.
fn assert_coverage(map: &BlockMap, code: &[u8]) {
    let mut stream = ByteStream::new(code).unwrap();
    stream.set_bci(0);
    while stream.current_bc().is_some() {
        let bci = stream.current_bci();
        let owner = map
            .block_at_bci(bci)
            .unwrap_or_else(|| panic!("bci {bci} is not mapped"));
        let block = map.block(owner);
        let signed = i32::try_from(bci).unwrap();
        assert!(block.is_instruction_block(), "bci {bci} mapped to {block}");
        assert!(
            block.start_bci() <= signed && signed <= block.end_bci(),
            "bci {bci} mapped to {block}"
        );
        stream.advance();
    }
}

/// Members of each loop directly follow its header.
fn assert_loops_contiguous(map: &BlockMap) {
    for (loop_id, &header) in map.loop_headers().iter().enumerate() {
        let members: Vec<usize> = map
            .blocks()
            .iter()
            .enumerate()
            .filter(|(_, block)| block.loops().contains(loop_id))
            .map(|(position, _)| position)
            .collect();
        assert_eq!(members[0], header.index());
        for pair in members.windows(2) {
            assert_eq!(pair[0] + 1, pair[1], "loop {loop_id} is not contiguous");
        }
    }
}

#[test]
fn test_straight_line() {
    let code = [ICONST_0, IRETURN];
    let map = build(&code, vec![]);
    assert_eq!(map.block_count(), 2);
    assert_eq!(map.start_block(), id(0));
    assert_eq!(map.block_at_bci(1), Some(id(0)));
    assert_eq!(map.block(id(0)).end_bci(), 1);
    assert_eq!(map.loop_count(), 0);

    let unwind = map.block(map.unwind_block());
    assert_eq!(map.unwind_block(), id(1));
    assert!(unwind.is_exception_dispatch());
    assert_eq!(unwind.handler_id(), Some(-1));
    assert_eq!(unwind.deopt_bci(), Some(AFTER_EXCEPTION_BCI));
    assert!(unwind.handler().is_none());
    assert!(map.verify().is_ok());
    assert!(map.bci_unique());
}

#[test]
fn test_if_else() {
    let mut asm = Assembler::new();
    let otherwise = asm.label();
    let end = asm.label();
    asm.op(ILOAD_0).branch(IFEQ, otherwise);
    asm.op(ICONST_1).branch(GOTO, end);
    asm.bind(otherwise).op(ICONST_0);
    asm.bind(end).op(IRETURN);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![]);
    assert_eq!(
        map.to_string(),
        "B0[0..1] Successors=[B2, B1]\n\
         B1[4..5] Successors=[B3]\n\
         B2[8..8] Successors=[B3]\n\
         B3[9..9]\n\
         B4[-4..-4] ExceptionDispatch\n"
    );
    assert_eq!(map.block(id(3)).predecessor_count(), 2);
    assert_coverage(&map, &code);
}

#[test]
fn test_call_covered_by_handler() {
    let code = [ALOAD_0, INVOKEVIRTUAL, 0, 0, RETURN, ASTORE_1, RETURN];
    let handlers = vec![ExceptionHandler::typed(0, 4, 5, "java/lang/Exception")];
    let map = build(&code, handlers);
    assert_eq!(
        map.to_string(),
        "B0[0..1] Successors=[B3, B1]\n\
         B1[5..5] ExceptionDispatch Successors=[B2]\n\
         B2[5..6] ExceptionEntry\n\
         B3[4..4]\n\
         B4[-4..-4] ExceptionDispatch\n"
    );

    let start = map.block(map.start_block());
    assert_eq!(start.exception_dispatch_successor(), Some(id(1)));
    assert_eq!(start.num_normal_successors(), 1);
    let dispatch = map.block(id(1));
    assert_eq!(dispatch.deopt_bci(), Some(1));
    assert_eq!(dispatch.handler_id(), Some(0));
    assert!(!dispatch.is_instruction_block());

    assert_eq!(map.handler_block(0), Some(id(2)));
    let covered: Vec<usize> = map.bci_exception_handler_ids(1).unwrap().iter().collect();
    assert_eq!(covered, vec![0]);
    assert!(map.bci_exception_handler_ids(4).unwrap().is_empty());
    assert!(map.bci_exception_handler_ids(2).is_none());
}

#[test]
fn test_while_loop() {
    let mut asm = Assembler::new();
    let exit = asm.label();
    asm.op(ICONST_0).op(ISTORE_1);
    let cond = asm.here();
    asm.op(ILOAD_1).op(ILOAD_0).branch(IF_ICMPGE, exit);
    asm.op(IINC).branch(GOTO, cond);
    asm.bind(exit).op(RETURN);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![]);
    assert_eq!(
        map.to_string(),
        "B0[0..1] Successors=[B1]\n\
         B1[2..4] LoopHeader Successors=[B3, B2] Loops=[B1]\n\
         B2[7..10] Successors=[B1] Loops=[B1]\n\
         B3[13..13]\n\
         B4[-4..-4] ExceptionDispatch\n"
    );
    assert_eq!(map.loop_count(), 1);
    assert_eq!(map.loop_header(0), Some(id(1)));
    assert!(map.block(id(1)).is_loop_header());
    assert_eq!(map.block(id(1)).loop_id(), 0);

    // The backward goto split the entry block right before the loop head.
    assert_eq!(map.block(id(0)).end_bci(), 1);
    assert_eq!(map.block_at_bci(2), Some(id(1)));
    assert_eq!(map.block_at_bci(4), Some(id(1)));
    assert_coverage(&map, &code);
    assert_loops_contiguous(&map);
}

#[test]
fn test_shared_handler_entry() {
    let mut asm = Assembler::new();
    let handler = asm.label();
    asm.op(ALOAD_0).op(INVOKESTATIC).branch(GOTO, handler);
    asm.bind(handler).op(RETURN);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![ExceptionHandler::catch_all(0, 4, 7)]);
    assert_eq!(map.block_count(), 6);
    let entry = map.handler_block(0).unwrap();
    assert!(map.block(entry).is_exception_entry());
    assert_eq!(map.block(entry).predecessor_count(), 1);
    assert_eq!(map.block_at_bci(7), Some(entry));

    let after_call = map.block(map.start_block()).successor(0);
    let target = map.block(after_call).successor(0);
    assert_ne!(target, entry);
    let copy = map.block(target);
    assert!(copy.is_duplicate());
    assert!(!copy.is_exception_entry());
    assert_eq!(copy.start_bci(), 7);
    assert!(!map.bci_unique());
    assert!(map.verify().is_ok());
}

#[test]
fn test_regions_share_one_handler_duplicate() {
    let mut asm = Assembler::new();
    let second = asm.label();
    let handler = asm.label();
    asm.op(ILOAD_0).branch(IFEQ, second);
    asm.op(INVOKESTATIC).branch(GOTO, handler);
    asm.bind(second).op(INVOKESTATIC).branch(GOTO, handler);
    asm.bind(handler).op(RETURN);
    assert_eq!(asm.bci_of(handler), Some(16));
    let code = asm.finish().unwrap();

    let handlers = vec![
        ExceptionHandler::catch_all(4, 7, 16),
        ExceptionHandler::catch_all(10, 13, 16),
    ];
    let map = build(&code, handlers);
    let entry = map.handler_block(0).unwrap();
    assert_eq!(map.handler_block(1), Some(entry));
    assert!(map.block(entry).is_exception_entry());
    assert_eq!(map.block_at_bci(16), Some(entry));

    let duplicates: Vec<_> = map.blocks().iter().filter(|block| block.is_duplicate()).collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].start_bci(), 16);
    assert!(!duplicates[0].is_exception_entry());
    assert_eq!(duplicates[0].predecessor_count(), 2);
    assert!(map.verify().is_ok());
    assert_coverage(&map, &code);
}

#[test]
fn test_unreached_handler_maps_to_duplicate() {
    // The handler covers only a `nop`, so its entry is reached by the goto alone.
    let code = [NOP, GOTO, 0, 3, RETURN];
    let map = build(&code, vec![ExceptionHandler::catch_all(0, 1, 4)]);
    assert!(map.handler_block(0).is_none());

    let owner = map.block_at_bci(4).unwrap();
    assert!(map.block(owner).is_duplicate());
    assert_eq!(map.block(owner).start_bci(), 4);
    assert_eq!(map.block(map.start_block()).successor(0), owner);
    assert_eq!(map.block_count(), 3);
    assert_coverage(&map, &code);
}

#[test]
fn test_handler_chain_order() {
    let code = [
        INVOKESTATIC, 0, 0, RETURN, POP, RETURN, POP, RETURN, POP, RETURN,
    ];
    let handlers = vec![
        ExceptionHandler::typed(0, 3, 4, "A"),
        ExceptionHandler::typed(0, 3, 6, "B"),
        ExceptionHandler::typed(0, 3, 8, "C"),
    ];
    let map = build(&code, handlers);

    let mut chain = Vec::new();
    let mut link = map
        .block(map.start_block())
        .exception_dispatch_successor()
        .unwrap();
    loop {
        let block = map.block(link);
        let handler_id = block.handler_id().unwrap();
        chain.push(handler_id);
        let handler_id = usize::try_from(handler_id).unwrap();
        assert_eq!(Some(block.successor(0)), map.handler_block(handler_id));
        if block.successor_count() == 1 {
            break;
        }
        link = block.successor(1);
    }
    assert_eq!(chain, vec![0, 1, 2]);
    assert_ne!(link, map.unwind_block());
}

#[test]
fn test_catch_all_prunes_chain() {
    let code = [
        INVOKESTATIC, 0, 0, RETURN, POP, RETURN, POP, RETURN, POP, RETURN,
    ];
    let handlers = vec![
        ExceptionHandler::typed(0, 3, 4, "A"),
        ExceptionHandler::catch_all(0, 3, 6),
        ExceptionHandler::typed(0, 3, 8, "C"),
    ];
    let map = build(&code, handlers);
    let candidates: Vec<usize> = map.bci_exception_handler_ids(0).unwrap().iter().collect();
    assert_eq!(candidates, vec![0, 1]);

    let head = map
        .block(map.start_block())
        .exception_dispatch_successor()
        .unwrap();
    let tail = map.block(head).successor(1);
    assert_eq!(map.block(tail).handler_id(), Some(1));
    assert_eq!(map.block(tail).successor_count(), 1);

    // The shadowed handler is never dispatched to.
    assert!(map.handler_block(2).is_none());
    assert!(map.block_at_bci(8).is_none());
}

#[test]
fn test_athrow_dispatch_is_last_successor() {
    let code = [ALOAD_0, ATHROW, POP, RETURN];
    let map = build(&code, vec![ExceptionHandler::typed(0, 2, 2, "E")]);
    let start = map.block(map.start_block());
    assert_eq!(start.num_normal_successors(), 0);
    let dispatch = start.exception_dispatch_successor().unwrap();
    assert_eq!(map.block(dispatch).start_bci(), 2);
    for block in map.blocks() {
        for (index, &successor) in block.successors().iter().enumerate() {
            if map.block(successor).is_exception_dispatch() {
                assert_eq!(index + 1, block.successor_count());
            }
        }
    }
}

#[test]
fn test_nested_loops_are_contiguous() {
    let mut asm = Assembler::new();
    let exit = asm.label();
    let outer_latch = asm.label();
    asm.op(ICONST_0).op(ISTORE_1);
    let outer = asm.here();
    asm.op(ILOAD_1).branch(IFEQ, exit);
    let inner = asm.here();
    asm.op(ILOAD_2).branch(IFEQ, outer_latch);
    asm.op(IINC).branch(GOTO, inner);
    asm.bind(outer_latch).op(IINC).branch(GOTO, outer);
    asm.bind(exit).op(RETURN);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![]);
    assert_eq!(map.loop_count(), 2);
    let outer_header = map.loop_header(0).unwrap();
    let inner_header = map.loop_header(1).unwrap();
    assert_eq!(map.block(outer_header).start_bci(), 2);
    assert_eq!(map.block(inner_header).start_bci(), 6);
    assert!(map.block(inner_header).loops().contains(0));
    assert!(map.block(map.block_at_bci(22).unwrap()).loops().is_empty());
    assert_loops_contiguous(&map);
    assert_coverage(&map, &code);
}

/// `count` single-block loops in a row.
fn self_loops(count: usize) -> Vec<u8> {
    let mut asm = Assembler::new();
    for _ in 0..count {
        let head = asm.here();
        asm.op(ILOAD_0).branch(IFNE, head);
    }
    asm.op(RETURN);
    asm.finish().unwrap()
}

#[test]
fn test_loop_capacity() {
    let map = build(&self_loops(LOOP_HEADER_MAX_CAPACITY), vec![]);
    assert_eq!(map.loop_count(), LOOP_HEADER_MAX_CAPACITY);

    let code = self_loops(LOOP_HEADER_MAX_CAPACITY + 1);
    let err = build_with(&code, vec![], &BlockMapOptions::default()).unwrap_err();
    assert_eq!(err.bailout(), Some(&Bailout::TooManyLoops));
}

/// `switch` entering every block of a five block cycle.
fn switch_into_cycle() -> Vec<u8> {
    let mut asm = Assembler::new();
    let cases: Vec<_> = (0..5).map(|_| asm.label()).collect();
    asm.op(ILOAD_0).table_switch(0, cases[0], &cases);
    for &case in &cases[..4] {
        asm.bind(case).op(NOP);
    }
    asm.bind(cases[4]).branch(GOTO, cases[0]);
    asm.finish().unwrap()
}

#[test]
fn test_irreducible_entries_are_duplicated() {
    let code = switch_into_cycle();
    let map = build(&code, vec![]);
    let duplicates = map.blocks().iter().filter(|block| block.is_duplicate()).count();
    assert_eq!(duplicates, 10);
    assert_eq!(map.block_count(), 17);
    assert_eq!(map.loop_count(), 1);
    assert!(map.verify().is_ok());
    assert_loops_contiguous(&map);

    // Only the cycle entered through its header stays a loop.
    let header = map.block(map.loop_header(0).unwrap());
    assert_eq!(header.start_bci(), 36);
    let members = map
        .blocks()
        .iter()
        .filter(|block| block.loops().contains(0))
        .count();
    assert_eq!(members, 5);
}

#[test]
fn test_duplication_budget() {
    let code = switch_into_cycle();
    let options = BlockMapOptions::default().with_max_duplication_factor(1.5);
    let err = build_with(&code, vec![], &options).unwrap_err();
    assert_eq!(
        err.bailout(),
        Some(&Bailout::DuplicationBudgetExceeded { factor: 1.5 })
    );
}

#[test]
fn test_irreducible_disabled() {
    let code = switch_into_cycle();
    let options = BlockMapOptions::default().with_max_duplication_factor(1.0);
    let err = build_with(&code, vec![], &options).unwrap_err();
    assert_eq!(err.bailout(), Some(&Bailout::Irreducible));
}

/// Two calls to one subroutine.
fn two_jsr_calls() -> Vec<u8> {
    let mut asm = Assembler::new();
    let sub = asm.label();
    asm.branch(JSR, sub).branch(JSR, sub).op(RETURN);
    asm.bind(sub).op(ASTORE_1).op_u8(RET, 1);
    asm.finish().unwrap()
}

#[test]
fn test_jsr_expansion() {
    let code = two_jsr_calls();
    let map = build(&code, vec![]);
    assert_eq!(
        map.to_string(),
        "B0[0..0] Successors=[B1]\n\
         B1[7..8] Successors=[B2]\n\
         B2[3..3] Successors=[B3]\n\
         B3[7..8] Successors=[B4]\n\
         B4[6..6]\n\
         B5[-4..-4] ExceptionDispatch\n"
    );
    assert_eq!(map.block(id(0)).jsr_successor(), Some(id(1)));
    assert_eq!(map.block(id(1)).ret_successor(), Some(id(2)));
    assert_eq!(map.block(id(2)).jsr_successor(), Some(id(3)));
    assert_eq!(map.block(id(3)).ret_successor(), Some(id(4)));
    assert!(map.block(id(1)).ends_with_ret());
    assert_eq!(map.block(id(1)).jsr_scope().depth(), 1);
    assert_eq!(map.block(id(1)).jsr_scope().next_return_address(), Some(3));
    assert_eq!(map.block(id(3)).jsr_scope().next_return_address(), Some(6));
    assert!(map.block(id(4)).jsr_scope().is_empty());
    assert!(!map.bci_unique());
}

#[test]
fn test_subroutine_body_maps_to_first_copy() {
    let code = two_jsr_calls();
    let map = build(&code, vec![]);
    assert_eq!(map.block_at_bci(7), Some(id(1)));
    assert_eq!(map.block_at_bci(8), Some(id(1)));
    assert_eq!(map.block_at_bci(3), Some(id(2)));
    assert_coverage(&map, &code);
}

#[test]
fn test_nested_subroutines() {
    let mut asm = Assembler::new();
    let outer = asm.label();
    let inner = asm.label();
    asm.branch(JSR, outer).op(RETURN);
    asm.bind(outer).op(ASTORE_1).branch(JSR, inner).op_u8(RET, 1);
    asm.bind(inner).op(ASTORE_2).op_u8(RET, 2);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![]);
    let inner_copy = map
        .blocks()
        .iter()
        .find(|block| block.start_bci() == 10)
        .unwrap();
    assert_eq!(inner_copy.jsr_scope().depth(), 2);
    assert_eq!(inner_copy.jsr_scope().next_return_address(), Some(8));

    let back_in_outer = map.block(inner_copy.ret_successor().unwrap());
    assert_eq!(back_in_outer.start_bci(), 8);
    assert_eq!(back_in_outer.jsr_scope().depth(), 1);
    let back_at_top = map.block(back_in_outer.ret_successor().unwrap());
    assert_eq!(back_at_top.start_bci(), 3);
    assert!(back_at_top.jsr_scope().is_empty());

    assert!(map.blocks().iter().all(|block| block.jsr_scope().depth() <= 2));
    assert!(map.verify().is_ok());
    assert_coverage(&map, &code);
}

#[test]
fn test_recursive_jsr_stops_expansion() {
    let mut asm = Assembler::new();
    let sub = asm.label();
    let done = asm.label();
    asm.branch(JSR, sub).op(RETURN);
    asm.bind(sub).op(ASTORE_1).op(ILOAD_0).branch(IFEQ, done);
    asm.branch(JSR, sub);
    asm.bind(done).op_u8(RET, 1);
    let code = asm.finish().unwrap();

    let map = build(&code, vec![]);
    let entry = map.block(map.start_block()).jsr_successor().unwrap();
    assert_eq!(map.block(entry).start_bci(), 4);
    assert_eq!(map.block(entry).jsr_scope().depth(), 1);

    // The nested call keeps pointing at the unexpanded subroutine.
    let recursive = map
        .blocks()
        .iter()
        .find(|block| block.start_bci() == 9 && block.jsr_scope().depth() == 1)
        .unwrap();
    let target = map.block(recursive.jsr_successor().unwrap());
    assert_eq!(target.start_bci(), 4);
    assert!(target.jsr_scope().is_empty());
    assert!(map.verify().is_ok());
}

#[test]
fn test_jump_out_of_subroutine_into_jsr() {
    let mut asm = Assembler::new();
    let call_s = asm.label();
    let sub_u = asm.label();
    let sub_s = asm.label();
    asm.op(ILOAD_0).branch(IFEQ, call_s);
    asm.branch(JSR, sub_u).op(RETURN);
    asm.bind(call_s).branch(JSR, sub_s).op(RETURN);
    asm.bind(sub_u).op(ASTORE_1).branch(GOTO, call_s);
    asm.bind(sub_s).op(ASTORE_2).op_u8(RET, 2);
    let code = asm.finish().unwrap();

    let err = build_with(&code, vec![], &BlockMapOptions::default()).unwrap_err();
    assert!(matches!(
        err.bailout(),
        Some(Bailout::UnstructuredJsr { .. })
    ));
}

#[test]
fn test_jsr_disabled() {
    let code = two_jsr_calls();
    let options = BlockMapOptions::default().with_jsr_support(false);
    let err = build_with(&code, vec![], &options).unwrap_err();
    assert!(err.is_bailout());
    assert_eq!(err.to_string(), "Bailout: jsr/ret parsing disabled");
}

#[test]
fn test_ret_outside_subroutine() {
    let mut asm = Assembler::new();
    let sub = asm.label();
    asm.op(ILOAD_0).branch(IFEQ, sub);
    asm.branch(JSR, sub).op(RETURN);
    asm.bind(sub).op(ASTORE_1).op_u8(RET, 1);
    let code = asm.finish().unwrap();

    let err = build_with(&code, vec![], &BlockMapOptions::default()).unwrap_err();
    assert_eq!(
        err.bailout(),
        Some(&Bailout::RetOutsideSubroutine { bci: 9 })
    );
}

#[test]
fn test_out_of_bounds_target() {
    let code = [NOP, GOTO, 0, 9];
    let map = build(&code, vec![]);
    let start = map.block(map.start_block());
    let target = start.successor(0);
    assert!(map.block(target).is_out_of_bounds());
    assert_eq!(map.block(target).start_bci(), 10);
    assert!(map.instruction_block(map.start_block()).is_ok());
    assert_eq!(
        map.instruction_block(target).unwrap_err(),
        BlockMapError::OutOfBoundsTarget { bci: 10 }
    );
}

#[test]
fn test_unhandled_bytecode() {
    let err = build_with(&[NOP, BREAKPOINT], vec![], &BlockMapOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BlockMapError::UnhandledBytecode {
            opcode: BREAKPOINT,
            bci: 1
        }
    );
    assert!(!err.is_bailout());
}

#[test]
fn test_truncated_code() {
    let err = build_with(&[NOP, GOTO, 0], vec![], &BlockMapOptions::default()).unwrap_err();
    assert!(matches!(err, BlockMapError::Bytecode(_)));
}

#[test]
fn test_unrepresentable_handler_bci() {
    let handlers = vec![ExceptionHandler::catch_all(0, 1, usize::MAX)];
    let err = build_with(&[NOP, RETURN], handlers, &BlockMapOptions::default()).unwrap_err();
    assert_eq!(err, BlockMapError::BciOverflow { bci: usize::MAX });
    assert!(!err.is_bailout());
}

#[test]
fn test_split_exception_ranges() {
    let code = [NOP, NOP, NOP, RETURN, RETURN];
    let handlers = vec![ExceptionHandler::catch_all(1, 2, 4)];

    let map = build(&code, handlers.clone());
    assert_eq!(map.block_count(), 2);
    assert_eq!(map.block(map.start_block()).end_bci(), 3);

    let options = BlockMapOptions::default().with_split_exception_ranges(true);
    let map = build_with(&code, handlers, &options).unwrap();
    assert_eq!(map.block_count(), 4);
    let starts: Vec<i32> = map.blocks()[..3].iter().map(|block| block.start_bci()).collect();
    assert_eq!(starts, vec![0, 1, 2]);
    assert_eq!(map.block(map.block_at_bci(3).unwrap()).start_bci(), 2);
}

#[test]
fn test_clear_liveness_metadata() {
    let code = [ALOAD_0, INVOKEVIRTUAL, 0, 0, RETURN, ASTORE_1, RETURN];
    let mut map = build(&code, vec![ExceptionHandler::catch_all(0, 4, 5)]);
    assert!(map.block_at_bci(0).is_some());
    assert!(map.handler_block(0).is_some());

    map.clear_liveness_metadata();
    assert!(map.block_at_bci(0).is_none());
    assert!(map.bci_exception_handler_ids(1).is_none());
    assert!(map.handler_block(0).is_none());
    assert_eq!(map.block_count(), 5);
    assert!(map.verify().is_ok());
}

#[test]
fn test_build_all_keeps_input_order() {
    let methods = vec![
        MethodCode::new("straight", vec![ICONST_0, IRETURN]),
        MethodCode::new("broken", vec![NOP, 0xfe]),
        MethodCode::new("subroutine", two_jsr_calls()),
    ];
    let results = build_all(&methods, &BlockMapOptions::default());
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().block_count(), 2);
    assert!(matches!(
        results[1],
        Err(BlockMapError::UnhandledBytecode { bci: 1, .. })
    ));
    assert_eq!(results[2].as_ref().unwrap().block_count(), 6);
}
